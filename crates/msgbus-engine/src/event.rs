//! Decoded in-flight message.

use msgbus_core::message::Message;

use crate::envelope::PublishEnvelope;

/// A message after its envelope has been decoded, as it flows through the
/// filter pipeline and the subscriber registry.
#[derive(Debug, Clone)]
pub struct BusEvent {
    /// Bus-wide id.
    pub global_id: u64,
    /// Per-channel id.
    pub message_id: u64,
    /// Stored (site-scoped) channel name.
    pub channel: String,
    /// Payload plus allow-sets.
    pub envelope: PublishEnvelope,
}

impl BusEvent {
    /// Decode a wire message into an event.
    ///
    /// Fails when the payload is not a valid envelope; callers skip such
    /// entries with a warning rather than aborting delivery.
    pub fn decode(message: Message) -> Result<Self, serde_json::Error> {
        let envelope: PublishEnvelope = serde_json::from_str(&message.data)?;
        Ok(Self {
            global_id: message.global_id,
            message_id: message.message_id,
            channel: message.channel,
            envelope,
        })
    }
}
