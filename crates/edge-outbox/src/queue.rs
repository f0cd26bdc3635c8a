//! Delivery queue between the identity producer and the sender.

use crate::{OutboxError, OutboxResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Create a FIFO delivery queue.
///
/// `capacity` of `None` means unbounded. Enqueueing never waits either way:
/// a full capped queue rejects the identity instead.
pub fn delivery_queue(capacity: Option<usize>) -> (QueueProducer, DeliveryQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    let producer = QueueProducer {
        tx,
        depth: depth.clone(),
        capacity,
    };
    (producer, DeliveryQueue { rx, depth })
}

/// Producer side; cheap to clone.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::UnboundedSender<String>,
    depth: Arc<AtomicUsize>,
    capacity: Option<usize>,
}

impl QueueProducer {
    /// Append an identity without waiting on network state.
    pub fn enqueue(&self, identity: impl Into<String>) -> OutboxResult<()> {
        let identity = identity.into();
        if identity.trim().is_empty() {
            return Err(OutboxError::EmptyIdentity);
        }

        match self.capacity {
            Some(capacity) => {
                let reserved = self
                    .depth
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
                        (depth < capacity).then_some(depth + 1)
                    });
                if reserved.is_err() {
                    warn!(identity = %identity, capacity, "Delivery queue full, identity rejected");
                    return Err(OutboxError::QueueFull { capacity });
                }
            }
            None => {
                self.depth.fetch_add(1, Ordering::SeqCst);
            }
        }

        if self.tx.send(identity).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(OutboxError::QueueClosed);
        }
        debug!(depth = self.len(), "Identity queued");
        Ok(())
    }

    /// Identities waiting to be sent.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Result of a bounded wait on the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued {
    Item(String),
    /// Nothing arrived within the wait.
    Timeout,
    /// Every producer is gone and the queue is drained.
    Closed,
}

/// Consumer side, owned by the sender.
#[derive(Debug)]
pub struct DeliveryQueue {
    rx: mpsc::UnboundedReceiver<String>,
    depth: Arc<AtomicUsize>,
}

impl DeliveryQueue {
    /// Take the oldest identity, waiting at most `wait`.
    pub async fn dequeue(&mut self, wait: Duration) -> Dequeued {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(identity)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Dequeued::Item(identity)
            }
            Ok(None) => Dequeued::Closed,
            Err(_) => Dequeued::Timeout,
        }
    }

    pub fn try_dequeue(&mut self) -> Option<String> {
        let identity = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(identity)
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further enqueues; identities already queued stay readable.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
