//! Connection and message routing layer of the hub.
//!
//! This crate provides:
//! - `ConnectionServer`: one TCP listener per device channel
//! - `ConnectionHandler`: per-connection task that decodes frames and writes
//!   outbound messages
//! - `Registry`: the live connections of a channel
//! - `Router`: channel → processor dispatch and server-to-device broadcast

mod connection;
mod error;
mod registry;
mod router;
mod server;

pub use connection::{
    ConnectionHandle, ConnectionHandler, ConnectionId, HandlerState, OUTBOUND_QUEUE_CAPACITY,
};
pub use error::{DispatchError, HubError, HubResult};
pub use hub_protocol::{Channel, Message};
pub use registry::Registry;
pub use router::{ProcessorFn, Router};
pub use server::{ConnectionServer, ServerConfig};
