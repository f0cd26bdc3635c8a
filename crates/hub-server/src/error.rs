//! Hub error types.

use hub_protocol::Channel;
use thiserror::Error;

/// Hub error type.
#[derive(Error, Debug)]
pub enum HubError {
    /// Listening socket could not be bound; fatal for that channel
    #[error("Failed to bind {channel} server on {addr}: {source}")]
    Bind {
        channel: Channel,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Read or write failure on a device connection
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// `start` called on a server that already ran
    #[error("{0} server was already started")]
    AlreadyStarted(Channel),

    /// `start` called after `stop`
    #[error("{0} server has been stopped")]
    Stopped(Channel),
}

/// Result type alias using HubError.
pub type HubResult<T> = Result<T, HubError>;

/// A message that reached the router but was not processed.
///
/// Dispatch failures are logged and the message is dropped; the connection
/// that delivered it is unaffected.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Nothing registered for the channel
    #[error("No processor registered for channel {0}")]
    NoProcessor(Channel),

    /// Processor returned an error
    #[error("Processor for {channel} failed: {reason}")]
    Failed { channel: Channel, reason: String },

    /// Processor panicked
    #[error("Processor for {channel} panicked")]
    Panicked { channel: Channel },
}
