//! Backend contract for pluggable message stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::message::Message;
use crate::result::BusResult;

/// Callback invoked with each delivered message.
///
/// Handlers are cheap and non-blocking: the engine's dispatch just signals
/// waiting sessions. Backends call the handler in `global_id` order.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Per-publish backlog bounds. `None` falls back to the backend defaults.
///
/// This is a closed set of recognized options, not an open map.
#[derive(Debug, Clone, Default)]
pub struct PublishOpts {
    /// Backlog container TTL, refreshed on each publish.
    pub max_backlog_age: Option<Duration>,
    /// Per-channel backlog size bound.
    pub max_backlog_size: Option<u64>,
    /// Global backlog size bound.
    pub max_global_backlog_size: Option<u64>,
}

/// Abstract message store: ordered per-channel backlogs, a global backlog,
/// and a real-time fan-out channel.
///
/// The publish step (allocate both ids, write both backlogs, refresh
/// expirations, publish to the fan-out, conditionally trim) is a single
/// atomic unit against the store: concurrent publishers cannot corrupt id
/// ordering or interleave payloads between the two backlogs.
///
/// Every operation may fail with `BackendUnavailable` when the store is
/// unreachable; callers decide whether to retry.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Atomically publish `data` on `channel`, returning the assigned
    /// per-channel message id.
    async fn publish(&self, channel: &str, data: &str, opts: &PublishOpts) -> BusResult<u64>;

    /// Last assigned message id on `channel`; 0 if the channel has never
    /// seen a publish.
    async fn last_id(&self, channel: &str) -> BusResult<u64>;

    /// Last assigned message ids for several channels at once.
    async fn last_ids(&self, channels: &[String]) -> BusResult<Vec<u64>> {
        let mut ids = Vec::with_capacity(channels.len());
        for channel in channels {
            ids.push(self.last_id(channel).await?);
        }
        Ok(ids)
    }

    /// Messages on `channel` with `message_id > after_id`, ascending.
    async fn backlog(&self, channel: &str, after_id: u64) -> BusResult<Vec<Message>>;

    /// Messages across all channels with `global_id > after_global_id`,
    /// ascending. Entries whose per-channel record has been trimmed are
    /// omitted.
    async fn global_backlog(&self, after_global_id: u64) -> BusResult<Vec<Message>>;

    /// Fetch a single retained message.
    async fn get_message(&self, channel: &str, message_id: u64) -> BusResult<Option<Message>>;

    /// Last assigned global id across the bus.
    async fn last_global_id(&self) -> BusResult<u64>;

    /// Deliver every future message on `channel` to `handler` in global
    /// order, starting with any backlog after `after_id`. Blocks the
    /// calling task until [`Backend::global_unsubscribe`].
    ///
    /// `after_id` is translated to a global cursor via
    /// [`Backend::get_message`] on a best-effort basis: if that message has
    /// been trimmed, `after_id` itself is used as the global cursor, which
    /// can replay a few messages from other channels. Downstream consumers
    /// deduplicate by id.
    async fn subscribe(
        &self,
        channel: &str,
        after_id: Option<u64>,
        handler: MessageHandler,
    ) -> BusResult<()> {
        let after_global_id = match after_id {
            Some(id) => match self.get_message(channel, id).await? {
                Some(m) => Some(m.global_id),
                None => Some(id),
            },
            None => None,
        };

        let channel = channel.to_string();
        let filtered: MessageHandler = Arc::new(move |m: Message| {
            if m.channel == channel {
                handler(m);
            }
        });
        self.global_subscribe(after_global_id, filtered).await
    }

    /// Deliver every future message on every channel to `handler` in
    /// strictly increasing `global_id` order, starting with any backlog
    /// after `after_global_id`. Blocks the calling task until
    /// [`Backend::global_unsubscribe`].
    async fn global_subscribe(
        &self,
        after_global_id: Option<u64>,
        handler: MessageHandler,
    ) -> BusResult<()>;

    /// Unblock a currently-running [`Backend::global_subscribe`] by sending
    /// a distinguished sentinel through the fan-out channel.
    async fn global_unsubscribe(&self) -> BusResult<()>;

    /// Whether the store has failed over to a read-only replica.
    async fn is_readonly(&self) -> bool;

    /// Drop all bus state from the store. Test/maintenance use only.
    async fn reset(&self) -> BusResult<()>;

    /// Force-expire every backlog without touching the id counters, so
    /// monotonicity is preserved across the rollover.
    async fn expire_all_backlogs(&self) -> BusResult<()>;

    /// Re-establish store connections after a process fork. In-flight
    /// subscriptions belong to the parent and are abandoned.
    async fn after_fork(&self) -> BusResult<()>;

    /// Release resources. The backend must not be used afterwards.
    async fn destroy(&self) -> BusResult<()>;
}
