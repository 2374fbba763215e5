//! Live set of viewer connections

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::errors::RelayError;

/// Serialized message shared by every subscriber it is pushed to
pub type Frame = Arc<String>;

/// Identifier of one viewer connection, unique within a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a connected viewer
///
/// Pushing enqueues the frame for the viewer's connection task, which owns
/// the socket. Dropping every handle closes the queue and ends that task.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub peer: SocketAddr,
    tx: mpsc::Sender<Frame>,
}

impl Subscriber {
    pub fn new(id: SubscriberId, peer: SocketAddr, tx: mpsc::Sender<Frame>) -> Self {
        Self { id, peer, tx }
    }

    /// Enqueue a frame without waiting
    ///
    /// Fails if the connection is gone or its queue is full.
    pub fn push(&self, frame: Frame) -> Result<(), RelayError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RelayError::SubscriberLagging(self.id),
            mpsc::error::TrySendError::Closed(_) => RelayError::SubscriberClosed(self.id),
        })
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an identifier for a new connection
    pub fn next_id(&self) -> SubscriberId {
        SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a subscriber, returning the new subscriber count
    pub async fn add(&self, subscriber: Subscriber) -> usize {
        let mut subscribers = self.subscribers.write().await;
        debug!(id = %subscriber.id, peer = %subscriber.peer, "subscriber added");
        subscribers.insert(subscriber.id, subscriber);
        subscribers.len()
    }

    /// Remove a subscriber; removing an absent one is a no-op
    ///
    /// Returns whether the subscriber was present.
    pub async fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().await.remove(&id).is_some();
        if removed {
            debug!(%id, "subscriber removed");
        }
        removed
    }

    /// Apply `f` to a stable copy of the current subscribers
    ///
    /// The lock is released before `f` runs, so concurrent `add`/`remove`
    /// calls never block on or disturb the iteration.
    pub async fn each<F>(&self, mut f: F)
    where
        F: FnMut(&Subscriber),
    {
        for subscriber in self.snapshot().await.iter() {
            f(subscriber);
        }
    }

    pub async fn snapshot(&self) -> Vec<Subscriber> {
        self.subscribers.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscribers.read().await.is_empty()
    }
}
