//! Identity resolution hooks.
//!
//! The bus performs no authentication of its own: the host application
//! injects resolver functions at engine construction, and each long-poll
//! request is scoped by whatever they return. A missing resolver means
//! "no scoping by this dimension".

use std::fmt;
use std::sync::Arc;

use http::request::Parts;

/// Resolver returning an optional scalar id for a request.
pub type IdLookup = Arc<dyn Fn(&Parts) -> Option<String> + Send + Sync>;

/// Resolver returning the group ids for a request.
pub type GroupIdsLookup = Arc<dyn Fn(&Parts) -> Vec<String> + Send + Sync>;

/// Injected identity resolvers.
#[derive(Clone, Default)]
pub struct IdentityHooks {
    /// Resolves the authenticated user id, if any.
    pub user_id_lookup: Option<IdLookup>,
    /// Resolves the user's group ids.
    pub group_ids_lookup: Option<GroupIdsLookup>,
    /// Resolves the tenant (site) id, if any.
    pub site_id_lookup: Option<IdLookup>,
}

impl fmt::Debug for IdentityHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityHooks")
            .field("user_id_lookup", &self.user_id_lookup.is_some())
            .field("group_ids_lookup", &self.group_ids_lookup.is_some())
            .field("site_id_lookup", &self.site_id_lookup.is_some())
            .finish()
    }
}

impl IdentityHooks {
    /// Resolve the full identity for a request.
    pub fn resolve(&self, parts: &Parts, client_id: String) -> SessionIdentity {
        SessionIdentity {
            user_id: self.user_id_lookup.as_ref().and_then(|f| f(parts)),
            group_ids: self
                .group_ids_lookup
                .as_ref()
                .map(|f| f(parts))
                .unwrap_or_default(),
            client_id,
            site_id: self.site_id_lookup.as_ref().and_then(|f| f(parts)),
        }
    }
}

/// Who a long-poll session is, as far as the bus cares.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    /// Authenticated user id, if any.
    pub user_id: Option<String>,
    /// Group memberships.
    pub group_ids: Vec<String>,
    /// Browser/client instance id from the request path.
    pub client_id: String,
    /// Tenant id; channels are namespaced by it when set.
    pub site_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_parts() -> Parts {
        let (parts, _) = http::Request::builder()
            .uri("/message-bus/abc/poll")
            .header("X-User-Id", "42")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn test_missing_hooks_mean_no_scoping() {
        let hooks = IdentityHooks::default();
        let identity = hooks.resolve(&request_parts(), "abc".to_string());
        assert_eq!(identity.user_id, None);
        assert!(identity.group_ids.is_empty());
        assert_eq!(identity.site_id, None);
        assert_eq!(identity.client_id, "abc");
    }

    #[test]
    fn test_hooks_resolve_from_request() {
        let hooks = IdentityHooks {
            user_id_lookup: Some(Arc::new(|parts: &Parts| {
                parts
                    .headers
                    .get("X-User-Id")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            })),
            group_ids_lookup: Some(Arc::new(|_| vec!["staff".to_string()])),
            site_id_lookup: None,
        };
        let identity = hooks.resolve(&request_parts(), "abc".to_string());
        assert_eq!(identity.user_id.as_deref(), Some("42"));
        assert_eq!(identity.group_ids, vec!["staff".to_string()]);
    }
}
