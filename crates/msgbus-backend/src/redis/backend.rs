//! The canonical backend over Redis.
//!
//! Per-channel backlogs and the global backlog are sorted sets scored by
//! message id and global id respectively; the fan-out channel is Redis
//! pub/sub. Publishing runs the atomic script in [`crate::redis::script`].

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use tracing::{debug, warn};

use msgbus_core::config::bus::BusConfig;
use msgbus_core::error::{BusError, ErrorKind};
use msgbus_core::message::{Message, UNSUBSCRIBE_SENTINEL};
use msgbus_core::result::BusResult;
use msgbus_core::traits::backend::{Backend, MessageHandler, PublishOpts};

use crate::keys;

use super::client::{RedisClient, map_err};
use super::script::publish_script;

/// Redis-backed message store.
#[derive(Debug)]
pub struct RedisBackend {
    /// Connection wrapper (commands + dedicated pub/sub).
    client: RedisClient,
    /// Default backlog bounds, overridable per publish.
    config: BusConfig,
    /// Cached publish script (EVALSHA with EVAL fallback).
    script: redis::Script,
}

impl RedisBackend {
    /// Create a backend over an established client.
    pub fn new(client: RedisClient, config: BusConfig) -> Self {
        Self {
            client,
            config,
            script: publish_script(),
        }
    }

    /// Read a counter key, treating a missing key as 0.
    async fn read_counter(&self, key: &str) -> BusResult<u64> {
        let mut conn = self.client.manager().await;
        let value: Option<u64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(value.unwrap_or(0))
    }

    /// Catch up from the global backlog until `highest` is current.
    ///
    /// A concurrent publisher between our fan-out read and our backlog read
    /// can leave the backlog briefly un-flushed, so the first attempts
    /// raise on a gap and retry after a short random sleep; the final
    /// attempt tolerates gaps and advances past them. Progress made before
    /// a gap is kept, so retries never re-dispatch.
    async fn catch_up(&self, highest: &mut Option<u64>, handler: &MessageHandler) -> BusResult<()> {
        let mut h = highest.unwrap_or(0);
        let mut result = Ok(());

        for retries_left in (0..=4u32).rev() {
            result = self
                .process_global_backlog(&mut h, retries_left > 0, handler)
                .await;
            match &result {
                Ok(()) => break,
                Err(e) if e.kind == ErrorKind::BacklogOutOfOrder => {
                    debug!(highest = h, retries_left, "Global backlog gap, retrying");
                    let jitter = rand::thread_rng().gen_range(0..50);
                    tokio::time::sleep(Duration::from_millis(jitter)).await;
                }
                Err(_) => break,
            }
        }

        *highest = Some(h);
        result
    }

    /// Walk the global backlog after `h`, dispatching in order and
    /// advancing `h` past each delivered message.
    ///
    /// With `raise_on_gap`, a non-contiguous entry aborts with
    /// `BacklogOutOfOrder` (progress already made stays in `h`); without
    /// it, gaps are skipped.
    async fn process_global_backlog(
        &self,
        h: &mut u64,
        raise_on_gap: bool,
        handler: &MessageHandler,
    ) -> BusResult<()> {
        let last = self.last_global_id().await?;
        if *h > last {
            // The store was reset underneath us; start over.
            warn!(highest = *h, last_global_id = last, "Store reset detected");
            *h = 0;
        }

        for m in self.global_backlog(*h).await? {
            if m.global_id == *h + 1 {
                *h = m.global_id;
                handler(m);
            } else if raise_on_gap {
                return Err(BusError::backlog_out_of_order(*h));
            } else if m.global_id > *h {
                *h = m.global_id;
                handler(m);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn publish(&self, channel: &str, data: &str, opts: &PublishOpts) -> BusResult<u64> {
        let max_backlog_age = opts
            .max_backlog_age
            .unwrap_or_else(|| self.config.max_backlog_age())
            .as_secs();
        let max_backlog_size = opts.max_backlog_size.unwrap_or(self.config.max_backlog_size);
        let max_global_backlog_size = opts
            .max_global_backlog_size
            .unwrap_or(self.config.max_global_backlog_size);

        let mut conn = self.client.manager().await;
        let message_id: u64 = self
            .script
            .key(keys::global_id_key())
            .key(keys::backlog_id_key(channel))
            .key(keys::backlog_key(channel))
            .key(keys::global_backlog_key())
            .key(keys::fanout_channel(self.client.db()))
            .arg(Message::encode_without_ids(channel, data))
            .arg(channel)
            .arg(max_backlog_age)
            .arg(max_backlog_size)
            .arg(max_global_backlog_size)
            .arg(self.config.clear_every.max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;

        Ok(message_id)
    }

    async fn last_id(&self, channel: &str) -> BusResult<u64> {
        self.read_counter(&keys::backlog_id_key(channel)).await
    }

    async fn last_ids(&self, channels: &[String]) -> BusResult<Vec<u64>> {
        if channels.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.client.manager().await;
        let mut cmd = redis::cmd("MGET");
        for channel in channels {
            cmd.arg(keys::backlog_id_key(channel));
        }
        let values: Vec<Option<u64>> = cmd.query_async(&mut conn).await.map_err(map_err)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(0)).collect())
    }

    async fn backlog(&self, channel: &str, after_id: u64) -> BusResult<Vec<Message>> {
        let mut conn = self.client.manager().await;
        let entries: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(keys::backlog_key(channel))
            .arg(format!("({after_id}"))
            .arg("+inf")
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            match Message::decode(&entry) {
                Ok(m) => messages.push(m),
                Err(e) => warn!(channel, error = %e, "Skipping malformed backlog entry"),
            }
        }
        Ok(messages)
    }

    async fn global_backlog(&self, after_global_id: u64) -> BusResult<Vec<Message>> {
        let mut conn = self.client.manager().await;
        let entries: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(keys::global_backlog_key())
            .arg(format!("({after_global_id}"))
            .arg("+inf")
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        let mut messages = Vec::with_capacity(entries.len());
        for member in entries {
            let Some((id_part, channel)) = member.split_once('|') else {
                warn!(member, "Skipping malformed global backlog pointer");
                continue;
            };
            let Ok(message_id) = id_part.parse::<u64>() else {
                warn!(member, "Skipping malformed global backlog pointer");
                continue;
            };
            // The per-channel entry may have been trimmed independently.
            if let Some(m) = self.get_message(channel, message_id).await? {
                messages.push(m);
            }
        }
        Ok(messages)
    }

    async fn get_message(&self, channel: &str, message_id: u64) -> BusResult<Option<Message>> {
        let mut conn = self.client.manager().await;
        let entries: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(keys::backlog_key(channel))
            .arg(message_id)
            .arg(message_id)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        match entries.into_iter().next() {
            Some(entry) => Message::decode(&entry).map(Some),
            None => Ok(None),
        }
    }

    async fn last_global_id(&self) -> BusResult<u64> {
        self.read_counter(keys::global_id_key()).await
    }

    async fn global_subscribe(
        &self,
        after_global_id: Option<u64>,
        handler: MessageHandler,
    ) -> BusResult<()> {
        let mut highest = after_global_id;

        let mut pubsub = self.client.pubsub().await?;
        pubsub
            .subscribe(keys::fanout_channel(self.client.db()))
            .await
            .map_err(map_err)?;

        // The SUBSCRIBE ack has landed; anything published before it is
        // only reachable through the backlog.
        if highest.is_some() {
            self.catch_up(&mut highest, &handler).await?;
        }

        debug!(after = ?after_global_id, "Global subscription established");

        let mut stream = pubsub.on_message();
        while let Some(push) = stream.next().await {
            let payload: String = push.get_payload().map_err(map_err)?;
            if payload == UNSUBSCRIBE_SENTINEL {
                debug!("Unsubscribe sentinel received, closing global subscription");
                break;
            }

            let message = match Message::decode(&payload) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed fan-out payload");
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

        Ok(())
    }

    async fn global_unsubscribe(&self) -> BusResult<()> {
        let mut conn = self.client.manager().await;
        let _: () = redis::cmd("PUBLISH")
            .arg(keys::fanout_channel(self.client.db()))
            .arg(UNSUBSCRIBE_SENTINEL)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn is_readonly(&self) -> bool {
        let mut conn = self.client.manager().await;
        let result: Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(keys::readonly_probe_key())
            .arg("t")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => false,
            Err(e) => e.code() == Some("READONLY"),
        }
    }

    async fn reset(&self) -> BusResult<()> {
        let mut conn = self.client.manager().await;

        let mut doomed: Vec<String> = vec![
            keys::global_id_key().to_string(),
            keys::global_backlog_key().to_string(),
            keys::readonly_probe_key().to_string(),
        ];
        for pattern in [keys::backlog_key_pattern(), keys::backlog_id_key_pattern()] {
            let found: Vec<String> = redis::cmd("KEYS")
                .arg(pattern)
                .query_async(&mut conn)
                .await
                .map_err(map_err)?;
            doomed.extend(found);
        }

        let mut cmd = redis::cmd("DEL");
        for key in &doomed {
            cmd.arg(key);
        }
        let _: u64 = cmd.query_async(&mut conn).await.map_err(map_err)?;
        Ok(())
    }

    async fn expire_all_backlogs(&self) -> BusResult<()> {
        let mut conn = self.client.manager().await;

        // Counters are deliberately preserved so ids stay monotonic across
        // the rollover.
        let mut doomed: Vec<String> = vec![keys::global_backlog_key().to_string()];
        let found: Vec<String> = redis::cmd("KEYS")
            .arg(keys::backlog_key_pattern())
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        doomed.extend(found);

        let mut cmd = redis::cmd("DEL");
        for key in &doomed {
            cmd.arg(key);
        }
        let _: u64 = cmd.query_async(&mut conn).await.map_err(map_err)?;
        Ok(())
    }

    async fn after_fork(&self) -> BusResult<()> {
        self.client.reconnect().await
    }

    async fn destroy(&self) -> BusResult<()> {
        // Connections close on drop; nothing to tear down server-side.
        Ok(())
    }
}
