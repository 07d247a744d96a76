// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded in-memory cache serving reads when the backing stores are slow
//! or unavailable.
//!
//! Keys follow `{platform}:{identifier}` (and `{platform}:{identifier}:{field}`
//! for sub-records). Eviction is batched: when the entry count exceeds the
//! configured maximum, the oldest 20% by insertion order are removed in one
//! pass, so the most recently inserted 80% always survive.
//!
//! TTL is advisory. A `get` on a stale-by-TTL entry still returns it; callers
//! that care check [`CacheEntry::is_expired`] themselves.
//!
//! Entries stored through [`LocalCache::set_pinned`] are exempt from the
//! capacity eviction pass (they still honor `delete` and `clear`). The link
//! registry depends on this: its edges must survive ordinary read/write
//! churn, not just TTL sweeping.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Current wall-clock time as epoch millis.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A single cached value with its insertion timestamp and advisory TTL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    /// The cached JSON value
    pub value: Value,
    /// When the entry was stored (epoch millis)
    pub stored_at: i64,
    /// Advisory TTL in millis; `None` means no expiry
    pub ttl_ms: Option<u64>,
}

impl CacheEntry {
    /// Whether the advisory TTL has elapsed. Expired entries are still
    /// returned by [`LocalCache::get`]; this is for callers that opt in.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.ttl_ms {
            Some(ttl) => now_millis().saturating_sub(self.stored_at) as u64 > ttl,
            None => false,
        }
    }
}

/// Counter snapshot for [`LocalCache`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookup hits
    pub hits: u64,
    /// Lookup misses
    pub misses: u64,
    /// Total `set` calls
    pub sets: u64,
    /// Total `delete` calls that removed something
    pub deletes: u64,
    /// hits / (hits + misses), 0.0 when no lookups yet
    pub hit_rate: f64,
    /// Current entry count
    pub entries: usize,
}

struct CacheInner {
    map: HashMap<String, CacheEntry>,
    /// Keys in insertion order (re-inserted keys move to the back)
    order: VecDeque<String>,
    /// Keys the capacity eviction pass must skip
    pinned: HashSet<String>,
}

/// Bounded insertion-order cache.
pub struct LocalCache {
    inner: Mutex<CacheInner>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl LocalCache {
    /// Create a cache bounded to `max_entries`.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                pinned: HashSet::new(),
            }),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Look up a key. Stale-by-TTL entries are returned as-is.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let inner = self.inner.lock();
        match inner.map.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or overwrite a key. Overwriting moves the key to the back of
    /// the insertion order. May trigger a batched eviction pass.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Option<Duration>) {
        self.insert(key.into(), value, ttl, false);
    }

    /// Insert a key the capacity eviction pass must never remove.
    ///
    /// The capacity bound applies to evictable entries only; pinned entries
    /// count toward [`len`](Self::len) but not toward the bound, so callers
    /// pinning entries own keeping their number small.
    pub fn set_pinned(&self, key: impl Into<String>, value: Value, ttl: Option<Duration>) {
        self.insert(key.into(), value, ttl, true);
    }

    fn insert(&self, key: String, value: Value, ttl: Option<Duration>, pin: bool) {
        let entry = CacheEntry {
            value,
            stored_at: now_millis(),
            ttl_ms: ttl.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        };

        let mut inner = self.inner.lock();
        if inner.map.insert(key.clone(), entry).is_some() {
            inner.order.retain(|k| k != &key);
        }
        inner.order.push_back(key.clone());
        if pin {
            inner.pinned.insert(key);
        }
        self.sets.fetch_add(1, Ordering::Relaxed);

        if inner.map.len() - inner.pinned.len() > self.max_entries {
            self.evict_oldest(&mut inner);
        }
    }

    /// Remove a key. Returns whether anything was removed.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.map.remove(key).is_some();
        if removed {
            inner.order.retain(|k| k != key);
            inner.pinned.remove(key);
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Drop every entry, pinned included. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
        inner.pinned.clear();
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys starting with `prefix`, in insertion order.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Snapshot of all entries in insertion order (for exports).
    #[must_use]
    pub fn entries(&self) -> Vec<(String, CacheEntry)> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|k| inner.map.get(k).map(|e| (k.clone(), e.clone())))
            .collect()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            entries: self.len(),
        }
    }

    /// Evict the oldest 20% of the configured maximum in one pass,
    /// skipping pinned keys.
    fn evict_oldest(&self, inner: &mut CacheInner) {
        let evict_count = (self.max_entries / 5).max(1);
        let mut evicted = 0usize;
        let mut survivors = VecDeque::with_capacity(inner.order.len());
        while let Some(key) = inner.order.pop_front() {
            if evicted < evict_count && !inner.pinned.contains(&key) {
                inner.map.remove(&key);
                evicted += 1;
            } else {
                survivors.push_back(key);
            }
        }
        inner.order = survivors;
        debug!(evicted, remaining = inner.map.len(), "Cache eviction pass");
        crate::metrics::record_cache_evictions(evicted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get() {
        let cache = LocalCache::new(10);
        cache.set("chat:42", json!({"name": "Dana"}), None);

        let entry = cache.get("chat:42").unwrap();
        assert_eq!(entry.value, json!({"name": "Dana"}));
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_miss_returns_none() {
        let cache = LocalCache::new(10);
        assert!(cache.get("web:nobody").is_none());
    }

    #[test]
    fn test_delete() {
        let cache = LocalCache::new(10);
        cache.set("chat:1", json!(1), None);
        assert!(cache.delete("chat:1"));
        assert!(!cache.delete("chat:1"));
        assert!(cache.get("chat:1").is_none());
    }

    #[test]
    fn test_clear() {
        let cache = LocalCache::new(10);
        for i in 0..5 {
            cache.set(format!("chat:{i}"), json!(i), None);
        }
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_keeps_newest_80_percent() {
        let cache = LocalCache::new(100);
        for i in 0..101 {
            cache.set(format!("chat:{i}"), json!(i), None);
        }

        // One eviction pass removed the oldest 20 entries
        assert_eq!(cache.len(), 81);
        assert!(cache.get("chat:0").is_none());
        assert!(cache.get("chat:19").is_none());
        assert!(cache.get("chat:20").is_some());
        assert!(cache.get("chat:100").is_some());
    }

    #[test]
    fn test_never_exceeds_max_entries() {
        let cache = LocalCache::new(50);
        for i in 0..500 {
            cache.set(format!("k:{i}"), json!(i), None);
            assert!(cache.len() <= 50);
        }
    }

    #[test]
    fn test_overwrite_moves_to_back_of_order() {
        let cache = LocalCache::new(5);
        for i in 0..5 {
            cache.set(format!("k:{i}"), json!(i), None);
        }
        // Refresh the oldest key, then overflow: k:1 is now the oldest
        cache.set("k:0", json!("fresh"), None);
        cache.set("k:5", json!(5), None);

        assert!(cache.get("k:1").is_none());
        assert_eq!(cache.get("k:0").unwrap().value, json!("fresh"));
    }

    #[test]
    fn test_ttl_is_advisory() {
        let cache = LocalCache::new(10);
        cache.set("chat:42", json!("stale"), Some(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(5));

        // Stale entry is still served; expiry is the caller's call
        let entry = cache.get("chat:42").unwrap();
        assert!(entry.is_expired());
        assert_eq!(entry.value, json!("stale"));
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let cache = LocalCache::new(10);
        cache.set("chat:42", json!(1), None);
        assert!(!cache.get("chat:42").unwrap().is_expired());
    }

    #[test]
    fn test_stats() {
        let cache = LocalCache::new(10);
        cache.set("a", json!(1), None);
        cache.get("a");
        cache.get("a");
        cache.get("missing");
        cache.delete("a");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.deletes, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_keys_with_prefix() {
        let cache = LocalCache::new(10);
        cache.set("link:a|b", json!(1), None);
        cache.set("chat:42", json!(2), None);
        cache.set("link:c|d", json!(3), None);

        let keys = cache.keys_with_prefix("link:");
        assert_eq!(keys, vec!["link:a|b".to_string(), "link:c|d".to_string()]);
    }

    #[test]
    fn test_entries_snapshot_in_insertion_order() {
        let cache = LocalCache::new(10);
        cache.set("b", json!(2), None);
        cache.set("a", json!(1), None);

        let entries = cache.entries();
        assert_eq!(entries[0].0, "b");
        assert_eq!(entries[1].0, "a");
    }

    #[test]
    fn test_pinned_entries_survive_capacity_eviction() {
        let cache = LocalCache::new(10);
        cache.set_pinned("link:a|b", json!(1), None);

        for i in 0..50 {
            cache.set(format!("k{i}"), json!(i), None);
        }

        assert!(cache.get("link:a|b").is_some());
        // The bound still holds for evictable entries
        assert!(cache.len() <= 11);
    }

    #[test]
    fn test_eviction_still_sheds_around_pinned_keys() {
        let cache = LocalCache::new(5);
        // Pinned key sits at the front of the insertion order
        cache.set_pinned("keep", json!(0), None);
        for i in 0..6 {
            cache.set(format!("k{i}"), json!(i), None);
        }

        // Oldest evictable entry went, not the pinned one
        assert!(cache.get("keep").is_some());
        assert!(cache.get("k0").is_none());
        assert!(cache.get("k5").is_some());
    }

    #[test]
    fn test_delete_and_clear_remove_pinned_entries() {
        let cache = LocalCache::new(10);
        cache.set_pinned("link:a|b", json!(1), None);
        assert!(cache.delete("link:a|b"));
        assert!(cache.get("link:a|b").is_none());

        cache.set_pinned("link:c|d", json!(2), None);
        cache.clear();
        assert!(cache.is_empty());
    }
}
