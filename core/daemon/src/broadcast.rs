//! Fan-out of committed registry mutations to observer connections.
//!
//! Each subscriber owns a bounded queue of pre-serialized lines. Publishing
//! never blocks: a subscriber whose queue is full, or whose receiving side is
//! gone, is removed from the set, which closes its stream.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};

use attn_daemon_protocol::BroadcastEvent;
use tracing::{debug, warn};

pub type SubscriberId = u64;
pub type Line = Arc<str>;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("too many subscribers (max {max})")]
    TooManySubscribers { max: usize },

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Receiving half handed to the connection that subscribed.
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: Receiver<Line>,
}

pub struct Hub {
    subscribers: Mutex<BTreeMap<SubscriberId, SyncSender<Line>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    max_subscribers: usize,
}

impl Hub {
    pub fn new(queue_capacity: usize, max_subscribers: usize) -> Self {
        Self {
            subscribers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            max_subscribers: max_subscribers.max(1),
        }
    }

    /// Registers a subscriber whose queue starts with `initial`.
    pub fn subscribe(&self, initial: &BroadcastEvent) -> Result<Subscription, HubError> {
        let line = encode(initial)?;
        let mut subscribers = self.lock();
        if subscribers.len() >= self.max_subscribers {
            return Err(HubError::TooManySubscribers {
                max: self.max_subscribers,
            });
        }

        let (sender, receiver) = mpsc::sync_channel(self.queue_capacity);
        // Fresh queue with capacity >= 1, so the first send cannot fail.
        let _ = sender.try_send(line);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        subscribers.insert(id, sender);
        debug!(subscriber_id = id, total = subscribers.len(), "Subscriber added");
        Ok(Subscription { id, receiver })
    }

    /// Enqueues the event for every subscriber. Returns how many received it.
    pub fn publish(&self, event: &BroadcastEvent) -> usize {
        let line = match encode(event) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, event = event.name(), "Failed to serialize broadcast event");
                return 0;
            }
        };

        let mut subscribers = self.lock();
        subscribers.retain(|id, sender| match sender.try_send(Line::clone(&line)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    subscriber_id = *id,
                    event = event.name(),
                    session_id = event.session_id().unwrap_or_default(),
                    "Dropping slow subscriber"
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(subscriber_id = *id, "Subscriber disconnected");
                false
            }
        });
        subscribers.len()
    }

    /// Queues a reply line on one subscriber's stream, behind any queued events.
    pub fn send_to(&self, id: SubscriberId, line: Line) -> bool {
        let mut subscribers = self.lock();
        let Some(sender) = subscribers.get(&id) else {
            return false;
        };
        match sender.try_send(line) {
            Ok(()) => true,
            Err(err) => {
                if matches!(err, TrySendError::Full(_)) {
                    warn!(subscriber_id = id, "Dropping slow subscriber");
                }
                subscribers.remove(&id);
                false
            }
        }
    }

    pub fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            debug!(subscriber_id = id, "Subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.lock().contains_key(&id)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SubscriberId, SyncSender<Line>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn encode(event: &BroadcastEvent) -> Result<Line, HubError> {
    Ok(Line::from(serde_json::to_string(event)?))
}
