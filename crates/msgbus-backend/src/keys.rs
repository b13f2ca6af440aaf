//! Store key builders.
//!
//! The exact strings are part of the wire contract: every process sharing
//! a store must derive identical keys, so all construction lives here.

/// Key holding the bus-wide global id counter.
pub fn global_id_key() -> &'static str {
    "__mb_global_id_n"
}

/// Key holding the per-channel message id counter.
pub fn backlog_id_key(channel: &str) -> String {
    format!("__mb_backlog_id_n_{channel}")
}

/// Sorted-set key holding a channel's backlog (score = message id,
/// member = encoded message).
pub fn backlog_key(channel: &str) -> String {
    format!("__mb_backlog_n_{channel}")
}

/// Sorted-set key holding the global backlog (score = global id,
/// member = `message_id|channel` pointer).
pub fn global_backlog_key() -> &'static str {
    "__mb_global_backlog_n"
}

/// Fan-out pub/sub channel name, scoped by the logical db index.
pub fn fanout_channel(db: u32) -> String {
    format!("_message_bus_{db}")
}

/// Probe key written to detect a read-only store.
pub fn readonly_probe_key() -> &'static str {
    "__mb_is_readonly"
}

/// Glob matching every per-channel backlog key.
pub fn backlog_key_pattern() -> &'static str {
    "__mb_backlog_n_*"
}

/// Glob matching every per-channel id counter key.
pub fn backlog_id_key_pattern() -> &'static str {
    "__mb_backlog_id_n_*"
}
