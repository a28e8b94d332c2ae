//! Short-TTL in-memory cache for expensive reads.
//!
//! Absorbs repeated queries during a burst of background work. Strictly a
//! read-through accelerant: the alert table stays authoritative, and every
//! store write invalidates the affected entries.
//!
//! Two independent namespaces are built from this type: patient context
//! (long TTL) and alert query results (short TTL). Both are constructed
//! explicitly and injected — no module-level singletons.

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }
}

/// Keyed value store where reads only succeed while `now - stored_at < ttl`.
/// Expired entries are evicted lazily on the next write.
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    default_ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn set(&mut self, key: &str, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&mut self, key: &str, value: V, ttl: Duration) {
        self.set_at(key, value, ttl, Instant::now());
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&mut self, prefix: &str) {
        self.entries.retain(|k, _| !k.starts_with(prefix));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ── Clock-explicit internals (tests drive `now` directly) ──────

    fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        self.entries
            .get(key)
            .filter(|e| e.is_fresh(now))
            .map(|e| e.value.clone())
    }

    fn set_at(&mut self, key: &str, value: V, ttl: Duration, now: Instant) {
        self.evict_expired(now);
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: now,
                ttl,
            },
        );
    }

    fn evict_expired(&mut self, now: Instant) {
        self.entries.retain(|_, e| e.is_fresh(now));
    }
}

/// Build the cache key for one (patient, encounter) alert-query scope.
/// Per-patient invalidation uses the `alerts:{patient_id}:` prefix.
pub fn alert_cache_key(patient_id: &str, encounter_id: &str) -> String {
    format!("alerts:{patient_id}:{encounter_id}")
}

/// Cache key for one patient's assembled context.
pub fn context_cache_key(patient_id: &str) -> String {
    format!("context:{patient_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_value_is_returned() {
        let mut cache: TtlCache<String> = TtlCache::new(Duration::from_millis(100));
        let t0 = Instant::now();
        cache.set_at("k", "v".into(), Duration::from_millis(100), t0);
        assert_eq!(cache.get_at("k", t0), Some("v".to_string()));
    }

    #[test]
    fn value_expires_after_ttl() {
        let mut cache: TtlCache<String> = TtlCache::new(Duration::from_millis(100));
        let t0 = Instant::now();
        cache.set_at("k", "v".into(), Duration::from_millis(100), t0);

        let later = t0 + Duration::from_millis(150);
        assert_eq!(cache.get_at("k", later), None);
    }

    #[test]
    fn expired_entries_evicted_on_next_write() {
        let mut cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(50));
        let t0 = Instant::now();
        cache.set_at("old", 1, Duration::from_millis(50), t0);
        assert_eq!(cache.len(), 1);

        let later = t0 + Duration::from_millis(100);
        cache.set_at("new", 2, Duration::from_millis(50), later);
        assert_eq!(cache.len(), 1, "stale entry should be gone");
        assert_eq!(cache.get_at("new", later), Some(2));
    }

    #[test]
    fn invalidate_removes_single_key() {
        let mut cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.invalidate("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn invalidate_prefix_scopes_to_patient() {
        let mut cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        cache.set(&alert_cache_key("p1", "e1"), 1);
        cache.set(&alert_cache_key("p1", "e2"), 2);
        cache.set(&alert_cache_key("p2", "e1"), 3);

        cache.invalidate_prefix("alerts:p1:");
        assert_eq!(cache.get(&alert_cache_key("p1", "e1")), None);
        assert_eq!(cache.get(&alert_cache_key("p1", "e2")), None);
        assert_eq!(cache.get(&alert_cache_key("p2", "e1")), Some(3));
    }

    #[test]
    fn overwrite_refreshes_entry() {
        let mut cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(100));
        let t0 = Instant::now();
        cache.set_at("k", 1, Duration::from_millis(100), t0);

        let t1 = t0 + Duration::from_millis(80);
        cache.set_at("k", 2, Duration::from_millis(100), t1);

        let t2 = t0 + Duration::from_millis(150);
        assert_eq!(cache.get_at("k", t2), Some(2), "refreshed write still live");
    }

    #[test]
    fn cache_keys_are_namespaced() {
        assert_eq!(alert_cache_key("p1", "e1"), "alerts:p1:e1");
        assert_eq!(context_cache_key("p1"), "context:p1");
        assert!(alert_cache_key("p1", "e9").starts_with("alerts:p1:"));
    }
}
