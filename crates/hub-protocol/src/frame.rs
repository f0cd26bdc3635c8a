//! Incremental framing for back-to-back JSON objects.
//!
//! The wire carries no length prefix and no delimiter: a single read may hold
//! zero, one or many documents, or part of one. `FrameDecoder` buffers bytes
//! across reads and parses whatever is complete.
//!
//! Recovery rules:
//! - a syntax error drops the offending bytes up to the next `{`
//! - a document left incomplete by earlier reads is abandoned when a later
//!   read is, on its own, a run of complete device frames (objects carrying
//!   `camera_id`); this is how a sender that gave up mid-frame is detected
//! - a pending document larger than `max_frame_len` is discarded

use crate::{DecodeError, Message, CAMERA_ID_FIELD};
use serde_json::{Deserializer, Value};
use tracing::trace;

/// Default upper bound for a single pending frame (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Stateful decoder for one connection's byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    /// Bytes buffered for a document that has not completed yet.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append one read's worth of bytes and return every frame it completed,
    /// in stream order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Message, DecodeError>> {
        let chunk_start = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut offset = 0;

        while offset < self.buffer.len() {
            let mut stream = Deserializer::from_slice(&self.buffer[offset..]).into_iter::<Value>();
            match stream.next() {
                None => {
                    // Only whitespace left.
                    offset = self.buffer.len();
                }
                Some(Ok(value)) => {
                    offset += stream.byte_offset();
                    frames.push(Message::from_value(value));
                }
                Some(Err(e)) if e.is_eof() => {
                    if offset < chunk_start && is_self_contained(&self.buffer[chunk_start..]) {
                        frames.push(Err(DecodeError::Truncated {
                            len: chunk_start - offset,
                        }));
                        offset = chunk_start;
                        continue;
                    }
                    trace!(pending = self.buffer.len() - offset, "Waiting for rest of frame");
                    break;
                }
                Some(Err(e)) => {
                    frames.push(Err(DecodeError::Json(e)));
                    offset = next_object_start(&self.buffer, offset + 1);
                }
            }
        }

        self.buffer.drain(..offset);

        if self.buffer.len() > self.max_frame_len {
            frames.push(Err(DecodeError::Oversized {
                limit: self.max_frame_len,
            }));
            self.buffer.clear();
        }

        frames
    }
}

/// True when `chunk` decodes completely into one or more device frames.
fn is_self_contained(chunk: &[u8]) -> bool {
    let mut complete = 0;
    for value in Deserializer::from_slice(chunk).into_iter::<Value>() {
        match value {
            Ok(Value::Object(fields)) if fields.contains_key(CAMERA_ID_FIELD) => complete += 1,
            _ => return false,
        }
    }
    complete > 0
}

fn next_object_start(buffer: &[u8], from: usize) -> usize {
    if from >= buffer.len() {
        return buffer.len();
    }
    buffer[from..]
        .iter()
        .position(|b| *b == b'{')
        .map(|pos| from + pos)
        .unwrap_or(buffer.len())
}
