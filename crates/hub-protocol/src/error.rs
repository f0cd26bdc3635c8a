//! Decode error types.

use thiserror::Error;

/// A frame that could not be turned into a `Message`.
///
/// Decode failures are per-frame: the connection that produced the frame
/// keeps running.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Malformed JSON (syntax error or invalid UTF-8)
    #[error("Malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Well-formed JSON that is not an object
    #[error("Frame is not a JSON object (got {0})")]
    NotAnObject(&'static str),

    /// An incomplete frame abandoned by the sender
    #[error("Discarded truncated frame ({len} bytes)")]
    Truncated { len: usize },

    /// A pending frame grew past the configured limit
    #[error("Frame exceeds {limit} bytes without completing")]
    Oversized { limit: usize },
}
