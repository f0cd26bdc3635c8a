//! Live-connection registry for one channel.

use crate::{ConnectionHandle, ConnectionId};
use hub_protocol::{Channel, Message};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// The set of connections currently served on a channel.
///
/// All access goes through one lock, so a broadcast never observes a handle
/// halfway through removal.
#[derive(Debug)]
pub struct Registry {
    channel: Channel,
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl Registry {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.lock().contains_key(id)
    }

    /// Snapshot of the handles registered right now.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.connections.lock().values().cloned().collect()
    }

    /// Queue `message` on every running connection. Returns how many accepted it.
    pub fn broadcast(&self, message: &Message) -> usize {
        let connections = self.connections.lock();
        let delivered = connections
            .values()
            .filter(|handle| handle.send(message.clone()))
            .count();
        debug!(
            channel = %self.channel,
            delivered,
            registered = connections.len(),
            "Broadcast to registry"
        );
        delivered
    }

    /// Returns `false` if a handle with the same id is already registered.
    pub(crate) fn insert(&self, handle: ConnectionHandle) -> bool {
        match self.connections.lock().entry(handle.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    pub(crate) fn remove(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.connections.lock().remove(id)
    }

    /// Drop every handle, returning how many were registered.
    pub(crate) fn clear(&self) -> usize {
        let mut connections = self.connections.lock();
        let count = connections.len();
        connections.clear();
        count
    }
}
