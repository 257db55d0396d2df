//! Incremental decoding of newline-delimited JSON frames.
//!
//! Transport chunks are appended as they arrive; complete JSON values are
//! pulled off the front of the buffer one at a time. Anything left over is
//! an incomplete frame and waits for the next chunk.

use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Deserializer, Value};

/// One object from the backend stream. Only the fields the relay forwards
/// are kept.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BackendFrame {
    #[serde(default)]
    pub message: Option<BackendMessage>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub done: bool,
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BackendMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl BackendFrame {
    pub fn content(&self) -> Option<&str> {
        self.message.as_ref()?.content.as_deref()
    }
}

enum Step {
    /// Buffer holds no complete value yet.
    Pending,
    /// A value was parsed from `len` bytes of the buffer.
    Value(Value, usize),
    /// The bytes at the front cannot start a valid value.
    Malformed(usize),
}

/// Largest partial frame held while waiting for the rest of it.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    skipped: usize,
    max_frame_bytes: usize,
    /// Last parse ran out of input and no `}` has arrived since.
    waiting: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame_bytes(MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            skipped: 0,
            max_frame_bytes,
            waiting: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        // A frame is an object, so an incomplete one can't finish until a
        // closing brace shows up.
        if chunk.contains(&b'}') {
            self.waiting = false;
        }
    }

    /// Number of malformed units discarded so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Pull the next complete frame off the buffer, skipping anything that
    /// doesn't decode. Returns `None` once only a partial frame (or nothing)
    /// remains.
    pub fn decode_next(&mut self) -> Option<BackendFrame> {
        if self.waiting && self.buffer.len() <= self.max_frame_bytes {
            return None;
        }
        self.waiting = false;

        loop {
            let start = self.buffer.iter().position(|b| !b.is_ascii_whitespace());
            let start = match start {
                Some(start) => start,
                None => {
                    self.buffer.clear();
                    return None;
                }
            };
            if start > 0 {
                self.buffer.drain(..start);
            }

            match self.step() {
                Step::Pending if self.buffer.len() > self.max_frame_bytes => {
                    warn!(
                        "Dropping {} byte(s) of a frame over the {} byte limit",
                        self.buffer.len(),
                        self.max_frame_bytes
                    );
                    self.buffer.clear();
                    self.skipped += 1;
                    return None;
                }
                Step::Pending => {
                    self.waiting = true;
                    return None;
                }
                Step::Value(value, len) => {
                    self.buffer.drain(..len);
                    match serde_json::from_value::<BackendFrame>(value) {
                        Ok(frame) => return Some(frame),
                        Err(e) => {
                            debug!("Skipping value that is not a frame: {}", e);
                            self.skipped += 1;
                        }
                    }
                }
                Step::Malformed(len) => {
                    debug!(
                        "Skipping {} malformed byte(s): {:?}",
                        len,
                        String::from_utf8_lossy(&self.buffer[..len])
                    );
                    self.buffer.drain(..len);
                    self.skipped += 1;
                }
            }
        }
    }

    /// Called once the upstream has closed. Returns how many bytes of an
    /// unfinished frame were thrown away.
    pub fn finish(&mut self) -> usize {
        let leftover = self.buffer.len();
        if leftover > 0 {
            debug!(
                "Discarding {} byte(s) of incomplete frame at end of stream",
                leftover
            );
        }
        self.buffer.clear();
        self.waiting = false;
        leftover
    }

    fn step(&self) -> Step {
        let mut values = Deserializer::from_slice(&self.buffer).into_iter::<Value>();
        match values.next() {
            None => Step::Pending,
            Some(Ok(value)) => Step::Value(value, values.byte_offset()),
            Some(Err(e)) if e.is_eof() => Step::Pending,
            Some(Err(_)) => Step::Malformed(malformed_len(&self.buffer)),
        }
    }
}

/// Length of the bad unit at the front of `buf`: through the next newline,
/// or up to the next byte that could open an object, or everything.
fn malformed_len(buf: &[u8]) -> usize {
    if let Some(nl) = buf.iter().position(|&b| b == b'\n') {
        return nl + 1;
    }
    buf.iter()
        .skip(1)
        .position(|&b| b == b'{')
        .map(|i| i + 1)
        .unwrap_or(buf.len())
}
