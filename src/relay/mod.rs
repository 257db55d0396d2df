//! Streaming relay between the inference backend and a chat client.
//!
//! One relay per request: a single upstream body, decoded incrementally and
//! re-emitted as [`OutboundFrame`]s as soon as each backend frame is
//! complete. The output stream is lazy, so a slow reader holds the relay at
//! its next `yield` instead of letting frames pile up.

pub mod decoder;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{BackendError, ByteStream, ChatBackend};
use crate::web::models::ChatRequest;
use decoder::{BackendFrame, FrameDecoder};

pub type FrameStream = BoxStream<'static, OutboundFrame>;

/// Client-facing unit of a streamed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub content: String,
    pub done: bool,
}

impl OutboundFrame {
    /// Frames carrying content map 1:1. A terminal frame without content
    /// still produces an empty `done` frame so every finished stream ends
    /// on one.
    pub fn from_backend(frame: &BackendFrame) -> Option<Self> {
        let done = frame.done;
        match frame.content() {
            Some(content) => Some(Self {
                content: content.to_owned(),
                done,
            }),
            None if done => Some(Self {
                content: String::new(),
                done,
            }),
            None => None,
        }
    }

    /// One NDJSON line.
    pub fn to_line(&self) -> Result<Bytes, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Done,
    UpstreamClosed,
    Cancelled,
    TransportError,
    IdleTimeout,
}

#[derive(Clone)]
pub struct Relay {
    backend: Arc<dyn ChatBackend>,
    read_timeout: Duration,
}

impl Relay {
    pub fn new(backend: Arc<dyn ChatBackend>, read_timeout: Duration) -> Self {
        Self {
            backend,
            read_timeout,
        }
    }

    /// Open the upstream and return the live frame sequence. Errors here
    /// happen before any frame exists; afterwards the stream only ends.
    pub async fn open(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<FrameStream, BackendError> {
        let id = Uuid::new_v4();
        info!(
            "[relay {}] opening upstream for model {} ({} messages)",
            id,
            request.model,
            request.messages.len()
        );

        let body = self.backend.open_stream(request).await.map_err(|e| {
            warn!("[relay {}] upstream refused: {}", id, e);
            e
        })?;

        Ok(relay_frames(id, body, cancel, self.read_timeout))
    }
}

fn relay_frames(
    id: Uuid,
    mut body: ByteStream,
    cancel: CancellationToken,
    read_timeout: Duration,
) -> FrameStream {
    let frames = async_stream::stream! {
        let mut decoder = FrameDecoder::new();
        let mut emitted = 0usize;

        let reason = 'relay: loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'relay EndReason::Cancelled,
                next = tokio::time::timeout(read_timeout, body.next()) => next,
            };

            let chunk = match next {
                Err(_) => break 'relay EndReason::IdleTimeout,
                Ok(None) => break 'relay EndReason::UpstreamClosed,
                Ok(Some(Err(e))) => {
                    warn!("[relay {}] {}", id, e);
                    break 'relay EndReason::TransportError;
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            decoder.push(&chunk);
            while let Some(frame) = decoder.decode_next() {
                let Some(out) = OutboundFrame::from_backend(&frame) else {
                    continue;
                };
                if cancel.is_cancelled() {
                    break 'relay EndReason::Cancelled;
                }
                let done = out.done;
                emitted += 1;
                yield out;
                if done {
                    break 'relay EndReason::Done;
                }
            }
        };

        if reason == EndReason::UpstreamClosed {
            decoder.finish();
        }
        drop(body);

        match reason {
            EndReason::Done | EndReason::UpstreamClosed => info!(
                "[relay {}] finished ({:?}): {} frames, {} skipped",
                id, reason, emitted, decoder.skipped()
            ),
            EndReason::Cancelled => info!(
                "[relay {}] client went away after {} frames, upstream released",
                id, emitted
            ),
            EndReason::TransportError | EndReason::IdleTimeout => warn!(
                "[relay {}] upstream failed mid-stream ({:?}) after {} frames",
                id, reason, emitted
            ),
        }
    };

    frames.boxed()
}
