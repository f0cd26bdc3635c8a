//! Edge-side delivery pipeline.
//!
//! This crate provides:
//! - `delivery_queue`: an unbounded (optionally capped) FIFO that decouples
//!   identity production from network state
//! - `ResilientSender`: drains the queue into the hub over TCP, retrying sends
//!   and reconnecting with backoff
//! - `IdentitySource` / `run_producer`: feed identities into the queue

mod error;
mod producer;
mod queue;
mod sender;

pub use error::{OutboxError, OutboxResult};
pub use producer::{run_producer, IdentitySource};
pub use queue::{delivery_queue, DeliveryQueue, Dequeued, QueueProducer};
pub use sender::{ResilientSender, SenderConfig, SenderEvent};
