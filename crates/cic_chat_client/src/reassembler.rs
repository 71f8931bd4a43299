//! Frame reassembly over a text transport with no message boundaries.
//!
//! Deliveries are appended to a buffer and complete JSON values are peeled off
//! its front. An incomplete prefix stays buffered until more text arrives;
//! anything that can never become valid discards the buffer.

use serde_json::Value;
use tracing::debug;

use crate::messages::{MessageError, ServerMessage};

/// Default bound on buffered text while a frame is incomplete.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Result of one extraction attempt.
#[derive(Debug)]
pub enum Feed {
    Message(ServerMessage),
    NeedMoreData,
    Malformed(FrameError),
}

/// Why buffered text was discarded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid JSON frame: {0}")]
    Syntax(#[source] serde_json::Error),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("incomplete frame of {len} bytes exceeds the {limit} byte limit")]
    Oversized { len: usize, limit: usize },
    #[error("incomplete frame abandoned after inactivity ({pending} bytes buffered)")]
    Stalled { pending: usize },
}

impl FrameError {
    /// Bounds violations; the connection is force-closed after these.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, FrameError::Oversized { .. } | FrameError::Stalled { .. })
    }
}

/// Per-connection reassembly buffer.
#[derive(Debug)]
pub struct FrameReassembler {
    buffer: String,
    max_bytes: usize,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameReassembler {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            max_bytes,
        }
    }

    /// Append a delivery and try to extract the first complete message.
    ///
    /// Further messages bundled in the same delivery are available through
    /// [`FrameReassembler::next_frame`].
    pub fn feed(&mut self, chunk: &str) -> Feed {
        self.buffer.push_str(chunk);
        self.next_frame()
    }

    /// Try to extract a message from what is already buffered.
    pub fn next_frame(&mut self) -> Feed {
        let (first, consumed) = {
            let mut values = serde_json::Deserializer::from_str(&self.buffer).into_iter::<Value>();
            let first = values.next();
            (first, values.byte_offset())
        };

        match first {
            None => Feed::NeedMoreData,
            Some(Ok(value)) => {
                self.consume(consumed);
                match ServerMessage::from_json(&value) {
                    Ok(message) => Feed::Message(message),
                    Err(e) => Feed::Malformed(e.into()),
                }
            }
            Some(Err(e)) if e.is_eof() => {
                if self.buffer.len() > self.max_bytes {
                    let len = self.buffer.len();
                    self.buffer.clear();
                    return Feed::Malformed(FrameError::Oversized {
                        len,
                        limit: self.max_bytes,
                    });
                }
                debug!(len = self.buffer.len(), "incomplete frame, waiting for more data");
                Feed::NeedMoreData
            }
            Some(Err(e)) => {
                self.buffer.clear();
                Feed::Malformed(FrameError::Syntax(e))
            }
        }
    }

    /// Drop an incomplete frame that stopped receiving data.
    pub fn abandon(&mut self) -> Option<FrameError> {
        if !self.is_pending() {
            return None;
        }
        let pending = self.buffer.len();
        self.buffer.clear();
        Some(FrameError::Stalled { pending })
    }

    /// Whether part of a frame is buffered.
    pub fn is_pending(&self) -> bool {
        !self.buffer.trim_start().is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn consume(&mut self, consumed: usize) {
        self.buffer.drain(..consumed);
        if self.buffer.trim_start().is_empty() {
            self.buffer.clear();
        }
    }
}
