//! The publish envelope: how scoping data travels through the store.
//!
//! The backend stores opaque payload bytes; the engine keeps the user
//! payload and the allow-sets together inside them as JSON, so scoping
//! survives the round trip through any backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON envelope serialized into the wire payload at publish and decoded
/// again at dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishEnvelope {
    /// The payload handed to subscribers.
    pub data: Value,
    /// If non-empty, only sessions with a matching user id may see this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<String>>,
    /// If non-empty, only sessions sharing a group id may see this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_ids: Option<Vec<String>>,
    /// If non-empty, only the named long-poll clients may see this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ids: Option<Vec<String>>,
}

impl PublishEnvelope {
    /// Envelope with no scoping: visible to every subscriber.
    pub fn public(data: Value) -> Self {
        Self {
            data,
            user_ids: None,
            group_ids: None,
            client_ids: None,
        }
    }

    /// Whether any allow-set restricts this message.
    pub fn is_scoped(&self) -> bool {
        let non_empty = |s: &Option<Vec<String>>| s.as_deref().is_some_and(|v| !v.is_empty());
        non_empty(&self.user_ids) || non_empty(&self.group_ids) || non_empty(&self.client_ids)
    }
}
