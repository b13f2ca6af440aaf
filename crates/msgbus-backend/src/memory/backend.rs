//! In-memory backend for tests and single-process deployments.
//!
//! State lives behind one async mutex; the fan-out channel is a
//! `tokio::sync::broadcast` carrying encoded wire frames, so the
//! subscribe path exercises the same codec as the Redis backend.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

use msgbus_core::config::bus::BusConfig;
use msgbus_core::message::{Message, UNSUBSCRIBE_SENTINEL};
use msgbus_core::result::BusResult;
use msgbus_core::traits::backend::{Backend, MessageHandler, PublishOpts};

/// Buffer size for the fan-out channel. Receivers that lag re-sync from
/// the global backlog.
const FANOUT_CAPACITY: usize = 4096;

/// Per-channel storage.
#[derive(Debug)]
struct ChannelState {
    /// Last assigned message id. Never reset by trimming.
    last_id: u64,
    /// Retained messages, keyed by message id.
    backlog: BTreeMap<u64, Message>,
    /// When this channel last accepted a publish.
    last_publish: Instant,
    /// Effective age bound, refreshed from each publish's options.
    max_age: Duration,
}

/// Whole-store state.
#[derive(Debug, Default)]
struct MemoryState {
    /// Last assigned global id. Never reset by trimming.
    global_id: u64,
    /// Global backlog: global id → (channel, message id) pointer.
    global_backlog: BTreeMap<u64, (String, u64)>,
    /// When the global backlog last accepted a publish.
    global_last_publish: Option<Instant>,
    /// Per-channel state.
    channels: HashMap<String, ChannelState>,
}

/// In-memory message store implementing the full backend contract.
#[derive(Debug)]
pub struct MemoryBackend {
    /// Store state.
    state: Mutex<MemoryState>,
    /// Fan-out channel carrying encoded frames.
    fanout: broadcast::Sender<String>,
    /// Default backlog bounds, overridable per publish.
    config: BusConfig,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new(config: BusConfig) -> Self {
        let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            fanout,
            config,
        }
    }

    /// Drop whole backlogs that have been idle past their age bound.
    ///
    /// Mirrors the container-TTL semantics of the Redis backend: either a
    /// publish keeps the backlog alive, or the entire backlog goes at once.
    /// Counters survive so ids stay monotonic.
    fn expire_stale(state: &mut MemoryState, global_max_age: Duration) {
        let now = Instant::now();
        for channel in state.channels.values_mut() {
            if !channel.backlog.is_empty() && now.duration_since(channel.last_publish) > channel.max_age {
                channel.backlog.clear();
            }
        }
        if let Some(last) = state.global_last_publish {
            if !state.global_backlog.is_empty() && now.duration_since(last) > global_max_age {
                state.global_backlog.clear();
            }
        }
    }

    /// Dispatch everything in the global backlog above `highest`, in order.
    ///
    /// Publishes commit synchronously under the state lock here, so unlike
    /// the Redis path there is no transient-gap window to retry around.
    async fn catch_up(&self, highest: &mut Option<u64>, handler: &MessageHandler) -> BusResult<()> {
        let mut h = highest.unwrap_or(0);
        if h > self.last_global_id().await? {
            warn!(highest = h, "Store reset detected");
            h = 0;
        }
        for m in self.global_backlog(h).await? {
            if m.global_id > h {
                h = m.global_id;
                handler(m);
            }
        }
        *highest = Some(h);
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn publish(&self, channel: &str, data: &str, opts: &PublishOpts) -> BusResult<u64> {
        let max_age = opts
            .max_backlog_age
            .unwrap_or_else(|| self.config.max_backlog_age());
        let max_size = opts.max_backlog_size.unwrap_or(self.config.max_backlog_size);
        let max_global_size = opts
            .max_global_backlog_size
            .unwrap_or(self.config.max_global_backlog_size);
        let clear_every = self.config.clear_every.max(1);

        let frame;
        let message_id;
        {
            let mut state = self.state.lock().await;
            Self::expire_stale(&mut state, self.config.max_backlog_age());

            state.global_id += 1;
            let global_id = state.global_id;

            let entry = state
                .channels
                .entry(channel.to_string())
                .or_insert_with(|| ChannelState {
                    last_id: 0,
                    backlog: BTreeMap::new(),
                    last_publish: Instant::now(),
                    max_age,
                });
            entry.last_id += 1;
            entry.last_publish = Instant::now();
            entry.max_age = max_age;
            message_id = entry.last_id;

            let message = Message::new(global_id, message_id, channel, data);
            frame = message.encode();
            entry.backlog.insert(message_id, message);

            if message_id > max_size && message_id % clear_every == 0 {
                // Remove entries with id <= message_id - max_size.
                let keep_from = message_id - max_size + 1;
                entry.backlog = entry.backlog.split_off(&keep_from);
            }

            state
                .global_backlog
                .insert(global_id, (channel.to_string(), message_id));
            state.global_last_publish = Some(Instant::now());

            if global_id > max_global_size && global_id % clear_every == 0 {
                let keep_from = global_id - max_global_size + 1;
                state.global_backlog = state.global_backlog.split_off(&keep_from);
            }
        }

        // No receivers is fine: the backlog is the source of truth.
        let _ = self.fanout.send(frame);
        Ok(message_id)
    }

    async fn last_id(&self, channel: &str) -> BusResult<u64> {
        let state = self.state.lock().await;
        Ok(state.channels.get(channel).map(|c| c.last_id).unwrap_or(0))
    }

    async fn backlog(&self, channel: &str, after_id: u64) -> BusResult<Vec<Message>> {
        let mut state = self.state.lock().await;
        Self::expire_stale(&mut state, self.config.max_backlog_age());
        Ok(state
            .channels
            .get(channel)
            .map(|c| {
                c.backlog
                    .range(after_id + 1..)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn global_backlog(&self, after_global_id: u64) -> BusResult<Vec<Message>> {
        let mut state = self.state.lock().await;
        Self::expire_stale(&mut state, self.config.max_backlog_age());
        let mut messages = Vec::new();
        for (channel, message_id) in state
            .global_backlog
            .range(after_global_id + 1..)
            .map(|(_, ptr)| ptr.clone())
            .collect::<Vec<_>>()
        {
            // The per-channel entry may have been trimmed independently.
            if let Some(m) = state
                .channels
                .get(&channel)
                .and_then(|c| c.backlog.get(&message_id))
            {
                messages.push(m.clone());
            }
        }
        Ok(messages)
    }

    async fn get_message(&self, channel: &str, message_id: u64) -> BusResult<Option<Message>> {
        let state = self.state.lock().await;
        Ok(state
            .channels
            .get(channel)
            .and_then(|c| c.backlog.get(&message_id))
            .cloned())
    }

    async fn last_global_id(&self) -> BusResult<u64> {
        let state = self.state.lock().await;
        Ok(state.global_id)
    }

    async fn global_subscribe(
        &self,
        after_global_id: Option<u64>,
        handler: MessageHandler,
    ) -> BusResult<()> {
        let mut highest = after_global_id;
        let mut rx = self.fanout.subscribe();

        if highest.is_some() {
            self.catch_up(&mut highest, &handler).await?;
        }

        debug!(after = ?after_global_id, "Global subscription established");

        loop {
            match rx.recv().await {
                Ok(frame) => {
                    if frame == UNSUBSCRIBE_SENTINEL {
                        debug!("Unsubscribe sentinel received, closing global subscription");
                        return Ok(());
                    }
                    let message = match Message::decode(&frame) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(error = %e, "Skipping malformed fan-out frame");
                            continue;
                        }
                    };
                    match highest {
                        None => {
                            highest = Some(message.global_id);
                            handler(message);
                        }
                        Some(h) if message.global_id == h + 1 => {
                            highest = Some(message.global_id);
                            handler(message);
                        }
                        Some(_) => {
                            self.catch_up(&mut highest, &handler).await?;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Fan-out receiver lagged, re-syncing from backlog");
                    self.catch_up(&mut highest, &handler).await?;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    async fn global_unsubscribe(&self) -> BusResult<()> {
        let _ = self.fanout.send(UNSUBSCRIBE_SENTINEL.to_string());
        Ok(())
    }

    async fn is_readonly(&self) -> bool {
        false
    }

    async fn reset(&self) -> BusResult<()> {
        let mut state = self.state.lock().await;
        *state = MemoryState::default();
        Ok(())
    }

    async fn expire_all_backlogs(&self) -> BusResult<()> {
        let mut state = self.state.lock().await;
        state.global_backlog.clear();
        for channel in state.channels.values_mut() {
            channel.backlog.clear();
        }
        Ok(())
    }

    async fn after_fork(&self) -> BusResult<()> {
        Ok(())
    }

    async fn destroy(&self) -> BusResult<()> {
        self.reset().await
    }
}
