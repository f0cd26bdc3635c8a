//! Outbox error types.

use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Socket error talking to the hub
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Every send attempt for one identity failed
    #[error("Delivery of {identity} failed after {attempts} attempts")]
    DeliveryExhausted { identity: String, attempts: u32 },

    /// Reconnection budget used up
    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Capped queue is full
    #[error("Delivery queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Consumer side of the queue is gone
    #[error("Delivery queue closed")]
    QueueClosed,

    /// Blank identity rejected at enqueue
    #[error("Identity is empty")]
    EmptyIdentity,
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
