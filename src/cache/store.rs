//! TTL response cache backed by a bounded LRU map.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use super::config::CacheConfig;
use super::invalidation::pattern_matches;
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "vetrina_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "vetrina_cache_miss_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "vetrina_cache_evict_total";

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub payload: V,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Valid iff `now - created_at < ttl`.
    pub fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub connected: bool,
    pub total_keys: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Best-effort TTL cache.
///
/// Expired entries are removed lazily on read. A disabled cache behaves like an
/// unreachable store: reads miss, writes are dropped, nothing errors.
pub struct ResponseCache<V> {
    entries: Option<RwLock<LruCache<String, CacheEntry<V>>>>,
    label: String,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled_with_label(config.namespace.clone());
        }
        Self {
            entries: Some(RwLock::new(LruCache::new(config.capacity_non_zero()))),
            label: config.namespace.clone(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::disabled_with_label("disabled".to_string())
    }

    fn disabled_with_label(label: String) -> Self {
        Self {
            entries: None,
            label,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let found = self.entries.as_ref().and_then(|entries| {
            let mut entries = rw_write(entries, SOURCE, "get");
            let now = Instant::now();
            let lookup = entries
                .get(key)
                .map(|entry| entry.is_live(now).then(|| entry.payload.clone()));
            match lookup {
                Some(Some(payload)) => Some(payload),
                Some(None) => {
                    entries.pop(key);
                    debug!(cache = %self.label, key, "Expired cache entry removed on read");
                    None
                }
                None => None,
            }
        });

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_CACHE_HIT, "cache" => self.label.clone()).increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_CACHE_MISS, "cache" => self.label.clone()).increment(1);
        }
        found
    }

    /// Inserts or overwrites. A zero TTL stores nothing.
    pub fn set(&self, key: impl Into<String>, payload: V, ttl: Duration) {
        let Some(entries) = self.entries.as_ref() else {
            return;
        };
        if ttl.is_zero() {
            return;
        }
        let key = key.into();
        let entry = CacheEntry {
            payload,
            created_at: Instant::now(),
            ttl,
        };
        let evicted = rw_write(entries, SOURCE, "set").push(key.clone(), entry);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            debug!(cache = %self.label, key = %evicted_key, "Cache entry evicted by capacity");
            counter!(METRIC_CACHE_EVICT, "cache" => self.label.clone()).increment(1);
        }
    }

    /// Live lookup without touching recency or hit counters.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.as_ref().is_some_and(|entries| {
            rw_read(entries, SOURCE, "contains")
                .peek(key)
                .is_some_and(|entry| entry.is_live(Instant::now()))
        })
    }

    /// Removes entries matching `pattern`, or everything when `None` or empty.
    /// Returns the number removed.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let Some(entries) = self.entries.as_ref() else {
            return 0;
        };
        let mut entries = rw_write(entries, SOURCE, "invalidate");
        match pattern.filter(|pattern| !pattern.is_empty()) {
            None => {
                let removed = entries.len();
                entries.clear();
                removed
            }
            Some(pattern) => {
                let doomed: Vec<String> = entries
                    .iter()
                    .filter(|(key, _)| pattern_matches(pattern, key))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in &doomed {
                    entries.pop(key);
                }
                doomed.len()
            }
        }
    }

    /// Drops every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let Some(entries) = self.entries.as_ref() else {
            return 0;
        };
        let mut entries = rw_write(entries, SOURCE, "purge_expired");
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    /// Entry count, including expired entries not yet swept.
    pub fn len(&self) -> usize {
        self.entries
            .as_ref()
            .map_or(0, |entries| rw_read(entries, SOURCE, "len").len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ping(&self) -> bool {
        self.entries.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            connected: self.ping(),
            total_keys: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn cache(capacity: usize) -> ResponseCache<&'static str> {
        ResponseCache::new(&CacheConfig {
            capacity,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = cache(8);
        cache.set("k", "v", Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0, "expired entry is removed on read");
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_absent_exactly_at_ttl() {
        let cache = cache(8);
        cache.set("k", "v", Duration::from_secs(2));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_replaces_payload_and_ttl() {
        let cache = cache(8);
        cache.set("k", "v1", Duration::from_secs(1));
        cache.set("k", "v2", Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get("k"), Some("v2"));
    }

    #[test]
    fn lru_eviction_bounds_capacity() {
        let cache = cache(2);
        cache.set("a", "1", Duration::from_secs(60));
        cache.set("b", "2", Duration::from_secs(60));
        assert_eq!(cache.get("a"), Some("1"));
        cache.set("c", "3", Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some("1"));
    }

    #[test]
    fn invalidate_by_glob_and_substring() {
        let cache = cache(16);
        let ttl = Duration::from_secs(60);
        cache.set("graphql:product:v1:slug=a:1", "a", ttl);
        cache.set("graphql:products:v1:default:2", "list", ttl);
        cache.set("graphql:search:v1:default:3", "search", ttl);

        assert_eq!(cache.invalidate(Some("graphql:products:*")), 1);
        assert_eq!(cache.invalidate(Some("slug=a")), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate(None), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn empty_pattern_clears_everything() {
        let cache = cache(4);
        cache.set("a", "1", Duration::from_secs(60));
        cache.set("b", "2", Duration::from_secs(60));
        assert_eq!(cache.invalidate(Some("")), 2);
    }

    #[test]
    fn disabled_cache_never_errors() {
        let cache: ResponseCache<u8> = ResponseCache::disabled();
        cache.set("k", 1, Duration::from_secs(60));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.invalidate(None), 0);
        assert!(!cache.ping());
        assert!(!cache.stats().connected);
    }

    #[test]
    fn config_flag_disables_store() {
        let cache: ResponseCache<u8> = ResponseCache::new(&CacheConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(!cache.ping());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired() {
        let cache = cache(4);
        cache.set("short", "s", Duration::from_secs(1));
        cache.set("long", "l", Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.contains("long"));
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = cache(4);
        cache.set("k", "v", Duration::from_secs(60));
        cache.get("k");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_keys, 1);
    }

    #[test]
    fn recovers_from_poisoned_lock() {
        let cache = cache(4);
        cache.set("k", "v", Duration::from_secs(60));

        let entries = cache.entries.as_ref().unwrap();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = entries.write().unwrap();
            panic!("poison cache lock");
        }));

        assert_eq!(cache.get("k"), Some("v"));
    }
}
