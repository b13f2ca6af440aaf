//! The bus message record and its textual wire encoding.
//!
//! The same encoding is used on the HTTP boundary and inside backend
//! backlogs, so co-operating processes written against the same store
//! interoperate byte-for-byte.

use serde::{Deserialize, Serialize};

use crate::error::BusError;
use crate::result::BusResult;

/// An immutable message accepted by the bus.
///
/// `message_id` is monotonic per channel; `global_id` is monotonic across
/// the whole bus. Both are assigned in a single atomic step at publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Bus-wide monotonic id, assigned at publish commit.
    pub global_id: u64,
    /// Per-channel monotonic id.
    pub message_id: u64,
    /// The channel this message was published to.
    pub channel: String,
    /// Opaque payload. The engine stores a JSON envelope here; the codec
    /// itself treats it as raw bytes.
    pub data: String,
}

impl Message {
    /// Create a message with assigned ids.
    pub fn new(global_id: u64, message_id: u64, channel: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            global_id,
            message_id,
            channel: channel.into(),
            data: data.into(),
        }
    }

    /// Encode to the wire format: `global_id|message_id|channel\ndata`.
    ///
    /// Only the first newline is significant when decoding, so payloads may
    /// contain newlines and `|` characters freely.
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}\n{}",
            self.global_id, self.message_id, self.channel, self.data
        )
    }

    /// Encode the id-less suffix (`channel\ndata`).
    ///
    /// The atomic publish script prepends the ids it allocates, producing
    /// the same bytes as [`Message::encode`].
    pub fn encode_without_ids(channel: &str, data: &str) -> String {
        format!("{channel}\n{data}")
    }

    /// Decode a message from the wire format.
    pub fn decode(encoded: &str) -> BusResult<Self> {
        let (header, data) = encoded
            .split_once('\n')
            .ok_or_else(|| BusError::malformed_message("missing header/payload separator"))?;

        let mut parts = header.splitn(3, '|');
        let global_id = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(|| BusError::malformed_message(format!("bad global id in {header:?}")))?;
        let message_id = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(|| BusError::malformed_message(format!("bad message id in {header:?}")))?;
        let channel = parts
            .next()
            .ok_or_else(|| BusError::malformed_message(format!("missing channel in {header:?}")))?;

        Ok(Self {
            global_id,
            message_id,
            channel: channel.to_string(),
            data: data.to_string(),
        })
    }
}

/// Sentinel payload published through the fan-out channel to unblock a
/// running global subscription.
pub const UNSUBSCRIBE_SENTINEL: &str = "$$UNSUBSCRIBE";
