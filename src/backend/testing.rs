//! In-process backend double for relay and handler tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{BackendError, ByteStream, ChatBackend};
use crate::web::models::ChatRequest;

/// Sets the flag when the upstream body is dropped.
struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Replays a fixed list of body chunks, optionally hanging afterwards
/// instead of closing.
pub struct ScriptedBackend {
    chunks: Mutex<Option<Vec<Result<Bytes, BackendError>>>>,
    hang_after: bool,
    pub reject: Option<u16>,
    pub reply: Value,
    pub released: Arc<AtomicBool>,
    pub polled: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<Value>>>,
}

impl ScriptedBackend {
    pub fn new(chunks: Vec<&str>) -> Self {
        Self::with_results(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from(c.to_string())))
                .collect(),
        )
    }

    pub fn with_results(chunks: Vec<Result<Bytes, BackendError>>) -> Self {
        Self {
            chunks: Mutex::new(Some(chunks)),
            hang_after: false,
            reject: None,
            reply: json!({}),
            released: Arc::new(AtomicBool::new(false)),
            polled: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn hanging(mut self) -> Self {
        self.hang_after = true;
        self
    }

    fn record(&self, request: &ChatRequest) -> Result<(), BackendError> {
        if let Ok(body) = serde_json::to_value(request) {
            self.requests.lock().unwrap().push(body);
        }
        match self.reject {
            Some(status) => Err(BackendError::Rejected {
                status,
                body: "no such model".to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, BackendError> {
        self.record(request)?;

        let chunks = self.chunks.lock().unwrap().take().unwrap_or_default();
        let guard = ReleaseFlag(self.released.clone());
        let polled = self.polled.clone();
        let hang = self.hang_after;
        let body = async_stream::stream! {
            let _guard = guard;
            for chunk in chunks {
                polled.fetch_add(1, Ordering::SeqCst);
                yield chunk;
            }
            if hang {
                futures::future::pending::<()>().await;
            }
        };
        Ok(body.boxed())
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Value, BackendError> {
        self.record(request)?;
        Ok(self.reply.clone())
    }
}
