//! Subscriber registries.
//!
//! [`SubscriberRegistry`] tracks blocked long-poll sessions per channel;
//! [`LocalSubscribers`] tracks in-process listeners. Both are mutated by
//! handler tasks and read by the reliable-pubsub dispatcher, so they sit
//! behind concurrent maps. Dispatches are brief: they only signal waiters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::BusEvent;

/// Channel → waiting sessions' wake senders.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    /// Stored channel name → session id → sender.
    channels: DashMap<String, HashMap<Uuid, mpsc::UnboundedSender<BusEvent>>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session's sender under every channel it watches.
    /// The returned guard unregisters on drop.
    pub fn register(
        self: &Arc<Self>,
        session_id: Uuid,
        channels: Vec<String>,
        tx: mpsc::UnboundedSender<BusEvent>,
    ) -> WaiterGuard {
        for channel in &channels {
            self.channels
                .entry(channel.clone())
                .or_default()
                .insert(session_id, tx.clone());
        }
        WaiterGuard {
            registry: Arc::clone(self),
            session_id,
            channels,
        }
    }

    /// Remove a session from the given channels.
    fn unregister(&self, session_id: Uuid, channels: &[String]) {
        for channel in channels {
            if let Some(mut waiters) = self.channels.get_mut(channel) {
                waiters.remove(&session_id);
                if waiters.is_empty() {
                    drop(waiters);
                    self.channels.remove(channel);
                }
            }
        }
    }

    /// Wake every session watching the event's channel. Returns how many
    /// waiters were signalled; senders whose receiver is gone are pruned.
    pub fn dispatch(&self, event: &BusEvent) -> usize {
        let Some(mut waiters) = self.channels.get_mut(&event.channel) else {
            return 0;
        };

        let mut woken = 0;
        waiters.retain(|_, tx| match tx.send(event.clone()) {
            Ok(()) => {
                woken += 1;
                true
            }
            Err(_) => false,
        });
        woken
    }

    /// Number of channels with at least one waiter.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Unregisters a waiting session when dropped (response complete, client
/// disconnect, and timeout all converge here).
#[derive(Debug)]
pub struct WaiterGuard {
    registry: Arc<SubscriberRegistry>,
    session_id: Uuid,
    channels: Vec<String>,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.session_id, &self.channels);
    }
}

/// Handler invoked for each event an in-process subscriber matches.
pub type LocalHandler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Handle returned by a local subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-process listeners fed from the dispatch path.
#[derive(Default)]
pub struct LocalSubscribers {
    /// Monotonic handle allocator.
    next_id: AtomicU64,
    /// Handle → (channel filter, handler). `None` matches every channel.
    subscribers: DashMap<u64, (Option<String>, LocalHandler)>,
}

impl std::fmt::Debug for LocalSubscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSubscribers")
            .field("len", &self.subscribers.len())
            .finish()
    }
}

impl LocalSubscribers {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one channel, or for all channels with `None`.
    pub fn register(&self, channel: Option<String>, handler: LocalHandler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, (channel, handler));
        SubscriptionId(id)
    }

    /// Drop a subscription. Unknown handles are ignored.
    pub fn unregister(&self, id: SubscriptionId) {
        self.subscribers.remove(&id.0);
    }

    /// Invoke every matching handler.
    pub fn dispatch(&self, event: &BusEvent) {
        for entry in self.subscribers.iter() {
            let (channel, handler) = entry.value();
            if channel.as_deref().is_none_or(|c| c == event.channel) {
                handler(event);
            }
        }
    }
}
