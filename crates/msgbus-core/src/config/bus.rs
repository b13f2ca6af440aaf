//! Bus engine and backlog configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bus engine configuration: long-poll timing and backlog bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// How long a long-poll request may block before returning empty.
    #[serde(default = "default_long_poll_timeout")]
    pub long_poll_timeout_secs: u64,
    /// Interval between keepalive chunks in streaming mode.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    /// Maximum number of retained messages per channel backlog.
    #[serde(default = "default_max_backlog_size")]
    pub max_backlog_size: u64,
    /// Maximum number of retained entries in the global backlog.
    #[serde(default = "default_max_global_backlog_size")]
    pub max_global_backlog_size: u64,
    /// Backlog container TTL in seconds, refreshed on each publish.
    ///
    /// Either no messages are removed (publishing keeps the container
    /// alive) or the entire backlog is dropped after this much inactivity.
    #[serde(default = "default_max_backlog_age")]
    pub max_backlog_age_secs: u64,
    /// Trim only when `last_id % clear_every == 0`. Raising this amortizes
    /// trim cost on hot channels.
    #[serde(default = "default_clear_every")]
    pub clear_every: u64,
}

impl BusConfig {
    /// Long-poll deadline as a [`Duration`].
    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.long_poll_timeout_secs)
    }

    /// Keepalive interval as a [`Duration`].
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// Backlog age bound as a [`Duration`].
    pub fn max_backlog_age(&self) -> Duration {
        Duration::from_secs(self.max_backlog_age_secs)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            long_poll_timeout_secs: default_long_poll_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
            max_backlog_size: default_max_backlog_size(),
            max_global_backlog_size: default_max_global_backlog_size(),
            max_backlog_age_secs: default_max_backlog_age(),
            clear_every: default_clear_every(),
        }
    }
}

fn default_long_poll_timeout() -> u64 {
    25
}

fn default_keepalive_interval() -> u64 {
    20
}

fn default_max_backlog_size() -> u64 {
    1000
}

fn default_max_global_backlog_size() -> u64 {
    2000
}

fn default_max_backlog_age() -> u64 {
    604_800
}

fn default_clear_every() -> u64 {
    1
}
