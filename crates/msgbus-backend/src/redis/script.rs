//! The atomic publish script.
//!
//! Everything a publish touches (both id counters, both backlogs, key
//! expirations, the fan-out PUBLISH, and conditional trimming) runs as one
//! server-side script, so concurrent publishers on the same store can
//! never interleave ids or payloads between the two backlogs.

/// Lua source of the publish step.
///
/// KEYS: global id counter, channel id counter, channel backlog zset,
/// global backlog zset, fan-out channel name.
///
/// ARGV: id-less encoded message (`channel\ndata`), channel name,
/// max_backlog_age (secs), max_backlog_size, max_global_backlog_size,
/// clear_every.
///
/// Returns the assigned per-channel message id.
pub const PUBLISH_LUA: &str = r#"
local encoded = ARGV[1]
local channel = ARGV[2]
local max_backlog_age = tonumber(ARGV[3])
local max_backlog_size = tonumber(ARGV[4])
local max_global_backlog_size = tonumber(ARGV[5])
local clear_every = tonumber(ARGV[6])

local global_id_key = KEYS[1]
local backlog_id_key = KEYS[2]
local backlog_key = KEYS[3]
local global_backlog_key = KEYS[4]
local fanout_channel = KEYS[5]

local global_id = redis.call("INCR", global_id_key)
local message_id = redis.call("INCR", backlog_id_key)

local payload = global_id .. "|" .. message_id .. "|" .. encoded
local global_member = message_id .. "|" .. channel

redis.call("ZADD", backlog_key, message_id, payload)
redis.call("EXPIRE", backlog_key, max_backlog_age)

redis.call("ZADD", global_backlog_key, global_id, global_member)
redis.call("EXPIRE", global_backlog_key, max_backlog_age)

redis.call("EXPIRE", backlog_id_key, max_backlog_age)

redis.call("PUBLISH", fanout_channel, payload)

if message_id > max_backlog_size and message_id % clear_every == 0 then
  redis.call("ZREMRANGEBYSCORE", backlog_key, 1, message_id - max_backlog_size)
end

if global_id > max_global_backlog_size and global_id % clear_every == 0 then
  redis.call("ZREMRANGEBYSCORE", global_backlog_key, 1, global_id - max_global_backlog_size)
end

return message_id
"#;

/// Build the cached script handle (EVALSHA with EVAL fallback).
pub fn publish_script() -> redis::Script {
    redis::Script::new(PUBLISH_LUA)
}
