//! Identity link registry: which platform identities belong to the same
//! real user.
//!
//! Links are undirected edges between two [`PlatformIdentity`] values,
//! stored as pinned entries in the [`LocalCache`] under a canonical edge
//! key with a long advisory TTL. Pinning exempts the edges from capacity
//! eviction, so ordinary read/write churn cannot sever a verified link.
//! There is no separate link store, so links are lost on process restart
//! (explicit limitation; the cache is process-memory only).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::LocalCache;
use crate::identity::{LoyaltySource, LoyaltyView, PlatformIdentity};

/// Prefix for link-edge cache keys.
const LINK_PREFIX: &str = "link:";

/// An undirected edge stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEdge {
    /// One endpoint
    pub a: PlatformIdentity,
    /// The other endpoint
    pub b: PlatformIdentity,
}

impl LinkEdge {
    /// Canonical form: endpoints ordered by cache key, so A→B and B→A
    /// produce the same edge.
    fn canonical(a: PlatformIdentity, b: PlatformIdentity) -> Self {
        if a.cache_key() <= b.cache_key() {
            Self { a, b }
        } else {
            Self { a: b, b: a }
        }
    }

    fn cache_key(&self) -> String {
        format!("{LINK_PREFIX}{}|{}", self.a.cache_key(), self.b.cache_key())
    }

    /// The endpoint opposite `identity`, if this edge touches it.
    fn other(&self, identity: &PlatformIdentity) -> Option<&PlatformIdentity> {
        if &self.a == identity {
            Some(&self.b)
        } else if &self.b == identity {
            Some(&self.a)
        } else {
            None
        }
    }
}

/// Registry of identity links, piggybacked on the local cache.
pub struct IdentityLinkRegistry {
    cache: Arc<LocalCache>,
    link_ttl: Duration,
}

impl IdentityLinkRegistry {
    /// Create a registry storing edges in `cache` with the given TTL.
    pub fn new(cache: Arc<LocalCache>, link_ttl: Duration) -> Self {
        Self { cache, link_ttl }
    }

    /// Link two identities as the same real user.
    ///
    /// Idempotent: linking the same pair twice (in either direction) stores
    /// a single edge and changes nothing. Linking an identity to itself is
    /// rejected.
    pub fn link(&self, a: PlatformIdentity, b: PlatformIdentity) -> bool {
        if a == b {
            debug!(identity = %a, "Refusing self-link");
            return false;
        }
        let edge = LinkEdge::canonical(a, b);
        let key = edge.cache_key();
        if self.cache.get(&key).is_some() {
            return true; // already linked, nothing to change
        }
        let value = match serde_json::to_value(&edge) {
            Ok(v) => v,
            Err(_) => return false,
        };
        self.cache.set_pinned(key, value, Some(self.link_ttl));
        debug!(a = %edge.a, b = %edge.b, "Identities linked");
        true
    }

    /// Identities directly linked to `identity`. Empty list, never an error.
    #[must_use]
    pub fn find_linked(&self, identity: &PlatformIdentity) -> Vec<PlatformIdentity> {
        let mut linked = Vec::new();
        for edge in self.edges() {
            if let Some(other) = edge.other(identity) {
                if !linked.contains(other) {
                    linked.push(other.clone());
                }
            }
        }
        linked
    }

    /// All stored edges (for exports).
    #[must_use]
    pub fn edges(&self) -> Vec<LinkEdge> {
        self.cache
            .keys_with_prefix(LINK_PREFIX)
            .into_iter()
            .filter_map(|key| self.cache.get(&key))
            .filter_map(|entry| serde_json::from_value(entry.value).ok())
            .collect()
    }
}

/// Aggregate loyalty views across an identity and its linked identities.
///
/// Points are summed, history and cards concatenated in input order. The
/// result is tagged `unified` when more than one view contributed, `single`
/// otherwise; the same set of views aggregates identically regardless of
/// which linked identity the query started from.
#[must_use]
pub fn unify_loyalty(views: Vec<LoyaltyView>) -> LoyaltyView {
    let source = if views.len() > 1 {
        LoyaltySource::Unified
    } else {
        LoyaltySource::Single
    };
    let mut unified = LoyaltyView::empty();
    unified.source = source;
    for view in views {
        unified.points += view.points;
        unified.history.extend(view.history);
        unified.cards.extend(view.cards);
    }
    unified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Platform;
    use serde_json::json;

    fn registry() -> IdentityLinkRegistry {
        IdentityLinkRegistry::new(Arc::new(LocalCache::new(100)), Duration::from_secs(3600))
    }

    fn chat(id: &str) -> PlatformIdentity {
        PlatformIdentity::new(Platform::Chat, id)
    }

    fn web(id: &str) -> PlatformIdentity {
        PlatformIdentity::new(Platform::Web, id)
    }

    #[test]
    fn test_link_and_find() {
        let registry = registry();
        assert!(registry.link(chat("42"), web("acct-7")));

        assert_eq!(registry.find_linked(&chat("42")), vec![web("acct-7")]);
        assert_eq!(registry.find_linked(&web("acct-7")), vec![chat("42")]);
    }

    #[test]
    fn test_link_is_idempotent() {
        let registry = registry();
        assert!(registry.link(chat("42"), web("acct-7")));
        assert!(registry.link(chat("42"), web("acct-7")));
        // Direction must not matter either
        assert!(registry.link(web("acct-7"), chat("42")));

        assert_eq!(registry.edges().len(), 1);
        assert_eq!(registry.find_linked(&chat("42")).len(), 1);
    }

    #[test]
    fn test_self_link_rejected() {
        let registry = registry();
        assert!(!registry.link(chat("42"), chat("42")));
        assert!(registry.edges().is_empty());
    }

    #[test]
    fn test_links_survive_cache_churn() {
        let cache = Arc::new(LocalCache::new(20));
        let registry =
            IdentityLinkRegistry::new(Arc::clone(&cache), Duration::from_secs(3600));
        assert!(registry.link(chat("42"), web("acct-7")));

        // Way past capacity: every evictable entry cycles several times
        for i in 0..100 {
            cache.set(format!("noise:{i}"), json!(i), None);
        }

        assert_eq!(registry.find_linked(&chat("42")), vec![web("acct-7")]);
        assert_eq!(registry.edges().len(), 1);
    }

    #[test]
    fn test_unlinked_identity_finds_nothing() {
        let registry = registry();
        registry.link(chat("1"), web("2"));
        assert!(registry.find_linked(&chat("99")).is_empty());
    }

    #[test]
    fn test_multiple_links_from_one_identity() {
        let registry = registry();
        registry.link(chat("42"), web("acct-7"));
        registry.link(chat("42"), PlatformIdentity::new(Platform::MobileIos, "dev-1"));

        let linked = registry.find_linked(&chat("42"));
        assert_eq!(linked.len(), 2);
    }

    #[test]
    fn test_unify_single_view() {
        let view = LoyaltyView {
            points: 50,
            history: vec![json!({"order": 1})],
            cards: vec!["C1".into()],
            source: LoyaltySource::Single,
        };
        let unified = unify_loyalty(vec![view.clone()]);
        assert_eq!(unified.points, 50);
        assert_eq!(unified.source, LoyaltySource::Single);
        assert_eq!(unified.history, view.history);
    }

    #[test]
    fn test_unify_sums_and_concatenates() {
        let a = LoyaltyView {
            points: 50,
            history: vec![json!({"order": 1})],
            cards: vec!["C1".into()],
            source: LoyaltySource::Single,
        };
        let b = LoyaltyView {
            points: 70,
            history: vec![json!({"order": 2}), json!({"order": 3})],
            cards: vec!["C2".into()],
            source: LoyaltySource::Single,
        };

        let unified = unify_loyalty(vec![a, b]);
        assert_eq!(unified.points, 120);
        assert_eq!(unified.history.len(), 3);
        assert_eq!(unified.cards, vec!["C1".to_string(), "C2".to_string()]);
        assert_eq!(unified.source, LoyaltySource::Unified);
    }

    #[test]
    fn test_unify_empty_is_single() {
        let unified = unify_loyalty(vec![]);
        assert_eq!(unified.points, 0);
        assert_eq!(unified.source, LoyaltySource::Single);
    }
}
