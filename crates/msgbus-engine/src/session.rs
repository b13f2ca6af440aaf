//! Per-request long-poll session state.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::envelope::PublishEnvelope;
use crate::identity::SessionIdentity;

/// Channels under this prefix are shared across sites and never namespaced.
pub const GLOBAL_CHANNEL_PREFIX: &str = "/global/";

/// Prefix applied to channel names when a session carries a site id.
pub const SITE_CHANNEL_PREFIX: &str = "/siteid/";

/// Translate a channel name into its stored form for a site.
///
/// `/global/…` channels are shared across all sites and pass through.
pub fn scoped_channel(channel: &str, site_id: Option<&str>) -> String {
    match site_id {
        Some(site) if !channel.starts_with(GLOBAL_CHANNEL_PREFIX) => {
            format!("{SITE_CHANNEL_PREFIX}{site}{channel}")
        }
        _ => channel.to_string(),
    }
}

/// One message as delivered to a long-poll client, after filtering.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    /// Bus-wide id of the underlying message.
    pub global_id: u64,
    /// Per-channel id of the underlying message.
    pub message_id: u64,
    /// Channel name as the client requested it (site prefix stripped).
    pub channel: String,
    /// Payload as shaped by the client filter chain.
    pub data: Value,
}

/// State for a single long-poll request.
///
/// Owned by the HTTP handler that created it and destroyed when the
/// response completes. Cursors are keyed by the stored (site-scoped)
/// channel name; the originally-requested names are kept for responses.
#[derive(Debug)]
pub struct ClientSession {
    /// Unique id of this poll (registry key).
    pub id: Uuid,
    /// Who this session is.
    pub identity: SessionIdentity,
    /// Stored channel name → last message id the client already has.
    cursors: HashMap<String, u64>,
    /// Stored channel name → channel name as requested.
    requested_names: HashMap<String, String>,
    /// Client-side request counter, echoed for client-side dedup.
    pub seq: u64,
    /// Opaque client epoch marker, held to detect backend resets.
    pub since_epoch: Option<String>,
    /// Whether the response should be a chunked stream.
    pub streaming: bool,
}

impl ClientSession {
    /// Create an empty session for an identity.
    pub fn new(identity: SessionIdentity) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            cursors: HashMap::new(),
            requested_names: HashMap::new(),
            seq: 0,
            since_epoch: None,
            streaming: false,
        }
    }

    /// Watch a channel from a cursor. The name is site-scoped according to
    /// the session identity.
    pub fn watch(&mut self, channel: &str, cursor: u64) {
        let stored = scoped_channel(channel, self.identity.site_id.as_deref());
        self.requested_names.insert(stored.clone(), channel.to_string());
        self.cursors.insert(stored, cursor);
    }

    /// The stored channel names this session watches.
    pub fn channels(&self) -> Vec<String> {
        self.cursors.keys().cloned().collect()
    }

    /// Whether the session watches no channels at all.
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Current cursor for a stored channel name.
    pub fn cursor(&self, stored_channel: &str) -> Option<u64> {
        self.cursors.get(stored_channel).copied()
    }

    /// Advance the cursor for a stored channel. Returns `false` when the
    /// message id is not above the cursor (duplicate or unwatched channel),
    /// in which case the message must not be delivered again.
    pub fn advance(&mut self, stored_channel: &str, message_id: u64) -> bool {
        match self.cursors.get_mut(stored_channel) {
            Some(cursor) if message_id > *cursor => {
                *cursor = message_id;
                true
            }
            _ => false,
        }
    }

    /// The channel name to report back to the client.
    pub fn requested_name(&self, stored_channel: &str) -> String {
        self.requested_names
            .get(stored_channel)
            .cloned()
            .unwrap_or_else(|| stored_channel.to_string())
    }

    /// Whether this session may see a message with the given allow-sets.
    ///
    /// Each non-empty set is an independent requirement: a message
    /// restricted to users, groups, and clients is visible only to a
    /// session matching all three. Empty or absent sets restrict nothing.
    pub fn allowed(&self, envelope: &PublishEnvelope) -> bool {
        let client_allowed = match envelope.client_ids.as_deref() {
            Some(ids) if !ids.is_empty() => ids.iter().any(|c| *c == self.identity.client_id),
            _ => true,
        };

        let user_allowed = match envelope.user_ids.as_deref() {
            Some(ids) if !ids.is_empty() => self
                .identity
                .user_id
                .as_ref()
                .is_some_and(|u| ids.iter().any(|i| i == u)),
            _ => true,
        };

        let group_allowed = match envelope.group_ids.as_deref() {
            Some(ids) if !ids.is_empty() => ids
                .iter()
                .any(|g| self.identity.group_ids.iter().any(|m| m == g)),
            _ => true,
        };

        client_allowed && user_allowed && group_allowed
    }
}
