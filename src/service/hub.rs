//! Live subscriber set and broadcast fan-out.

use crate::collector::lock_state;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a message could not be handed to a subscriber.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("subscriber queue is full")]
    Full,
    #[error("subscriber connection is closed")]
    Closed,
}

/// A live connection that can receive broadcast payloads.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, message: &str) -> Result<(), DeliveryError>;
}

/// Handle identifying one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Subscriber backed by a bounded tokio queue drained by a socket task.
pub struct ChannelSubscriber {
    sender: mpsc::Sender<String>,
}

impl ChannelSubscriber {
    /// Subscriber plus the receiving half for the socket task.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, message: &str) -> Result<(), DeliveryError> {
        self.sender
            .try_send(message.to_string())
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }
}

/// The set of live subscribers.
///
/// Connect, disconnect and broadcast share one lock, so membership never
/// changes in the middle of a fan-out.
#[derive(Default)]
pub struct ConnectionHub {
    subscribers: Mutex<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Connecting an id twice keeps one entry.
    pub fn connect(&self, id: SubscriberId, subscriber: Arc<dyn Subscriber>) {
        let mut subscribers = lock_state(&self.subscribers);
        if subscribers.insert(id, subscriber).is_none() {
            info!(subscriber = %id, total = subscribers.len(), "Subscriber connected");
        }
    }

    /// Remove a subscriber if present.
    pub fn disconnect(&self, id: SubscriberId) {
        let mut subscribers = lock_state(&self.subscribers);
        if subscribers.remove(&id).is_some() {
            info!(subscriber = %id, total = subscribers.len(), "Subscriber disconnected");
        }
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        lock_state(&self.subscribers).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock_state(&self.subscribers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `message` to every subscriber. Subscribers whose delivery
    /// fails are removed; returns how many were removed.
    pub fn broadcast(&self, message: &str) -> usize {
        let mut subscribers = lock_state(&self.subscribers);
        let before = subscribers.len();

        subscribers.retain(|id, subscriber| match subscriber.deliver(message) {
            Ok(()) => true,
            Err(err) => {
                warn!(subscriber = %id, error = %err, "Dropping subscriber after failed delivery");
                false
            }
        });

        let dropped = before - subscribers.len();
        debug!(delivered = subscribers.len(), dropped, "Broadcast complete");
        dropped
    }
}
