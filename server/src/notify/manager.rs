//! Subscriber registry and publication.
//!
//! Tracks live subscribers and fans each published event out to all of
//! them without ever waiting on a slow one.

use std::sync::Arc;

use dashmap::DashMap;
use kvsync_engine::{ChangeEvent, InstanceId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Sender half held by the notifier for one subscriber.
pub type EventSender = mpsc::Sender<ChangeEvent>;

/// A registered subscriber.
#[derive(Debug)]
struct Subscriber {
    /// Instance that opened the subscription, when it identified itself
    instance: Option<InstanceId>,
    /// Bounded channel to the subscriber's transport task
    sender: EventSender,
}

/// Publish/subscribe hub for change events.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug)]
pub struct ChangeNotifier {
    /// All live subscribers, keyed by subscription ID.
    subscribers: DashMap<String, Subscriber>,
    /// Per-subscriber buffer; a subscriber whose buffer is full is dropped.
    buffer: usize,
}

impl ChangeNotifier {
    /// Create a notifier with `buffer` events of slack per subscriber.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Create a new notifier wrapped in Arc for sharing.
    pub fn new_shared(buffer: usize) -> Arc<Self> {
        Arc::new(Self::new(buffer))
    }

    /// Register a subscriber. It is unregistered when the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe(self: &Arc<Self>, instance: Option<InstanceId>) -> Subscription {
        let id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(self.buffer);

        self.subscribers.insert(
            id.clone(),
            Subscriber {
                instance: instance.clone(),
                sender,
            },
        );

        tracing::info!(conn_id = %id, instance = ?instance, "Subscriber registered");

        Subscription {
            id,
            receiver,
            notifier: Arc::clone(self),
        }
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, id: &str) {
        if let Some((_, sub)) = self.subscribers.remove(id) {
            tracing::info!(conn_id = %id, instance = ?sub.instance, "Subscriber unregistered");
        }
    }

    /// Deliver `event` to every subscriber.
    ///
    /// Never blocks. Subscribers whose buffer is full or whose receiver is
    /// gone are removed; dropping their sender ends their stream so the
    /// client reconnects and resynchronizes.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.value().sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(conn_id = %entry.key(), "Subscriber lagging, disconnecting");
                    dropped.push(entry.key().clone());
                }
                Err(TrySendError::Closed(_)) => dropped.push(entry.key().clone()),
            }
        }

        for id in dropped {
            self.unsubscribe(&id);
        }

        tracing::debug!(
            keys = event.keys.len(),
            origin = ?event.origin,
            recipients = delivered,
            "Published change event"
        );

        delivered
    }

    /// Get the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether any live subscriber identified itself as `instance`.
    pub fn is_connected(&self, instance: &InstanceId) -> bool {
        self.subscribers
            .iter()
            .any(|s| s.value().instance.as_ref() == Some(instance))
    }
}

/// Handle yielding change events for one subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    receiver: mpsc::Receiver<ChangeEvent>,
    notifier: Arc<ChangeNotifier>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next event. `None` means the notifier dropped this
    /// subscriber and the stream is over.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.notifier.unsubscribe(&self.id);
    }
}
