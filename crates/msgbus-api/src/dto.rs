//! Poll request parsing.
//!
//! A poll request is a mapping from channel name to the last message id
//! the client already has, carried as form fields, a JSON object, or
//! query-string parameters. A handful of double-underscore names are
//! reserved for protocol metadata and never treated as channels.

use serde_json::Value;

use msgbus_core::error::BusError;
use msgbus_core::result::BusResult;

/// Client request counter, echoed for client-side dedup.
const PARAM_SEQ: &str = "__seq";

/// Opaque client epoch marker, held to detect backend resets.
const PARAM_SINCE_EPOCH: &str = "__since_epoch";

/// Streaming opt-in parameter (alternative to the header).
const PARAM_STREAM: &str = "stream";

/// A parsed poll request: per-channel cursors plus protocol metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollRequest {
    /// (channel, last seen message id) pairs, in request order.
    pub cursors: Vec<(String, u64)>,
    /// Client request counter.
    pub seq: u64,
    /// Opaque client epoch marker.
    pub since_epoch: Option<String>,
    /// Whether the `stream=true` parameter was present.
    pub stream_param: bool,
}

impl PollRequest {
    /// Build from key/value pairs (form body or query string).
    pub fn from_pairs<I>(pairs: I) -> BusResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut request = PollRequest::default();
        for (key, value) in pairs {
            match key.as_str() {
                PARAM_SEQ => request.seq = parse_cursor(&key, &value)?,
                PARAM_SINCE_EPOCH => request.since_epoch = Some(value),
                PARAM_STREAM => request.stream_param = value == "true" || value == "1",
                _ => request.cursors.push((key.clone(), parse_cursor(&key, &value)?)),
            }
        }
        Ok(request)
    }

    /// Build from a JSON object body. Cursor values may be JSON numbers or
    /// numeric strings.
    pub fn from_json(value: Value) -> BusResult<Self> {
        let Value::Object(map) = value else {
            return Err(BusError::bad_request("poll body must be a JSON object"));
        };

        let mut request = PollRequest::default();
        for (key, value) in map {
            match key.as_str() {
                PARAM_SEQ => request.seq = parse_json_cursor(&key, &value)?,
                PARAM_SINCE_EPOCH => {
                    request.since_epoch = Some(match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    });
                }
                PARAM_STREAM => request.stream_param = value == Value::Bool(true),
                _ => {
                    let cursor = parse_json_cursor(&key, &value)?;
                    request.cursors.push((key, cursor));
                }
            }
        }
        Ok(request)
    }
}

/// Parse a non-negative integer cursor from a string value.
fn parse_cursor(channel: &str, value: &str) -> BusResult<u64> {
    value.parse::<u64>().map_err(|_| {
        BusError::bad_request(format!(
            "cursor for {channel:?} must be a non-negative integer, got {value:?}"
        ))
    })
}

/// Parse a non-negative integer cursor from a JSON value.
fn parse_json_cursor(channel: &str, value: &Value) -> BusResult<u64> {
    match value {
        Value::Number(n) => n.as_u64().ok_or_else(|| {
            BusError::bad_request(format!(
                "cursor for {channel:?} must be a non-negative integer"
            ))
        }),
        Value::String(s) => parse_cursor(channel, s),
        _ => Err(BusError::bad_request(format!(
            "cursor for {channel:?} must be a non-negative integer"
        ))),
    }
}
