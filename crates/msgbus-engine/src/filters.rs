//! Message filter chains.
//!
//! Two chains run around visibility checks: server filters may mutate or
//! drop a message once per dispatch, client filters shape the payload for
//! each individual session. Filters are keyed by channel-name prefix and
//! run in registration order.

use std::sync::Arc;

use crate::event::BusEvent;

/// A filter takes the event and returns the (possibly modified) event to
/// pass on, or `None` to drop it.
pub type MessageFilter = Arc<dyn Fn(BusEvent) -> Option<BusEvent> + Send + Sync>;

/// An ordered prefix-keyed filter chain.
#[derive(Clone, Default)]
pub struct FilterChain {
    /// (channel prefix, filter) in registration order.
    filters: Vec<(String, MessageFilter)>,
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("len", &self.filters.len())
            .finish()
    }
}

impl FilterChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter for channels starting with `prefix`.
    ///
    /// Prefixes match the stored channel name, so site-scoped deployments
    /// register against the `/siteid/…` form (or `""` for everything).
    pub fn register(&mut self, prefix: impl Into<String>, filter: MessageFilter) {
        self.filters.push((prefix.into(), filter));
    }

    /// Run every matching filter in order. `None` means the message is
    /// dropped and must not be observed by any subscriber downstream.
    pub fn apply(&self, event: BusEvent) -> Option<BusEvent> {
        let mut current = event;
        for (prefix, filter) in &self.filters {
            if current.channel.starts_with(prefix.as_str()) {
                current = filter(current)?;
            }
        }
        Some(current)
    }

    /// Number of registered filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
