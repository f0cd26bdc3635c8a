//! Identity producers.

use crate::{OutboxError, QueueProducer};
use std::future::Future;
use tracing::{debug, info, warn};

/// Something that recognises members and yields their identities.
pub trait IdentitySource: Send {
    /// Next recognised identity, or `None` once the source is exhausted.
    fn next_identity(&mut self) -> impl Future<Output = Option<String>> + Send;
}

/// Pump identities from `source` into the queue.
///
/// Stops when the source ends or the queue closes. Returns how many
/// identities were enqueued.
pub async fn run_producer<S: IdentitySource>(mut source: S, producer: QueueProducer) -> usize {
    let mut enqueued = 0;

    while let Some(identity) = source.next_identity().await {
        match producer.enqueue(identity.trim()) {
            Ok(()) => {
                enqueued += 1;
                debug!(identity = %identity.trim(), "Identity recognised");
            }
            Err(OutboxError::EmptyIdentity) => continue,
            Err(OutboxError::QueueClosed) => {
                warn!("Delivery queue closed, producer stopping");
                break;
            }
            Err(e) => warn!(identity = %identity.trim(), error = %e, "Identity dropped"),
        }
    }

    info!(enqueued, "Identity producer finished");
    enqueued
}
