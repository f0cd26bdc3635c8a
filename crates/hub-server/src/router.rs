//! Channel routing: processor dispatch and push broadcasts.

use crate::{DispatchError, Registry};
use futures_util::FutureExt;
use hub_protocol::{Channel, Message};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Boxed async processor invoked once per decoded message.
pub type ProcessorFn = Box<
    dyn Fn(Message) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync,
>;

/// Routes decoded messages to per-channel processors and fans commands out
/// to push-enabled channels.
///
/// One router is shared by every server in the hub.
#[derive(Default)]
pub struct Router {
    processors: RwLock<HashMap<Channel, Arc<ProcessorFn>>>,
    push_registries: parking_lot::RwLock<HashMap<Channel, Arc<Registry>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the processor for `channel`, replacing any previous one.
    ///
    /// Returns `true` if a processor was replaced.
    pub async fn register_processor<F, Fut>(&self, channel: Channel, processor: F) -> bool
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: ProcessorFn = Box::new(move |message| Box::pin(processor(message)));
        let replaced = self
            .processors
            .write()
            .await
            .insert(channel.clone(), Arc::new(boxed))
            .is_some();

        if replaced {
            info!(channel = %channel, "Replaced channel processor");
        } else {
            debug!(channel = %channel, "Registered channel processor");
        }
        replaced
    }

    pub async fn has_processor(&self, channel: &Channel) -> bool {
        self.processors.read().await.contains_key(channel)
    }

    /// Run the processor registered for `channel` on `message`.
    ///
    /// Errors and panics are contained here and logged; the message is
    /// dropped and the caller carries on with the next one.
    pub async fn dispatch(&self, channel: &Channel, message: Message) -> Result<(), DispatchError> {
        let processor = self.processors.read().await.get(channel).cloned();
        let Some(processor) = processor else {
            warn!(channel = %channel, "No processor registered, dropping message");
            return Err(DispatchError::NoProcessor(channel.clone()));
        };

        let outcome = AssertUnwindSafe(async move { processor(message).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let reason = format!("{:#}", e);
                error!(channel = %channel, error = %reason, "Processor failed, message dropped");
                Err(DispatchError::Failed {
                    channel: channel.clone(),
                    reason,
                })
            }
            Err(_) => {
                error!(channel = %channel, "Processor panicked, message dropped");
                Err(DispatchError::Panicked {
                    channel: channel.clone(),
                })
            }
        }
    }

    /// Queue `message` on every running connection of a push-enabled channel.
    ///
    /// Returns how many connections accepted it; `0` when the channel has no
    /// push support.
    pub fn broadcast(&self, channel: &Channel, message: &Message) -> usize {
        let registry = self.push_registries.read().get(channel).cloned();
        match registry {
            Some(registry) => registry.broadcast(message),
            None => {
                warn!(channel = %channel, "Broadcast on a channel without push support, dropping");
                0
            }
        }
    }

    pub fn supports_push(&self, channel: &Channel) -> bool {
        self.push_registries.read().contains_key(channel)
    }

    pub(crate) fn enable_push(&self, registry: Arc<Registry>) {
        let channel = registry.channel().clone();
        if self
            .push_registries
            .write()
            .insert(channel.clone(), registry)
            .is_some()
        {
            warn!(channel = %channel, "Push registry replaced by another server");
        }
        debug!(channel = %channel, "Push enabled");
    }

    /// Withdraw push support, but only if `registry` is still the one serving it.
    pub(crate) fn disable_push(&self, registry: &Arc<Registry>) {
        let mut registries = self.push_registries.write();
        if let Some(current) = registries.get(registry.channel()) {
            if Arc::ptr_eq(current, registry) {
                registries.remove(registry.channel());
                debug!(channel = %registry.channel(), "Push disabled");
            }
        }
    }
}
