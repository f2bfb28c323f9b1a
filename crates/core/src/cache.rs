//! C2 — Query Cache.
//!
//! Process-wide LRU+TTL cache keyed by a normalized query fingerprint (§4.2).
//! No teacher file covers an in-process bounded cache directly;
//! `examples/Rul1an-assay/crates/assay-registry/src/cache.rs` grounds the
//! metadata-with-expiry shape (`fetched_at`/`expires_at`), reworked here from
//! a disk-backed cache into a bounded in-memory one since the spec wants a
//! fixed-capacity process-wide cache, not a persistent pack cache.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Match;

/// Cached value shape (§4.2: "Values are strings or structured match
/// lists").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CacheValue {
    Text(String),
    Matches(Vec<Match>),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

struct Entry {
    value: CacheValue,
    created_at: Instant,
}

struct Inner {
    map: HashMap<String, Entry>,
    /// Least-recently-used ordering, oldest at the front.
    order: VecDeque<String>,
    stats: CacheStats,
}

pub struct QueryCache {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// `get(key) -> value?`. TTL is checked lazily: an expired entry is a
    /// miss and is removed.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.map.get(key) {
            Some(entry) => entry.created_at.elapsed() > self.ttl,
            None => {
                inner.stats.misses += 1;
                return None;
            }
        };
        if expired {
            inner.map.remove(key);
            inner.order.retain(|k| k != key);
            inner.stats.misses += 1;
            inner.stats.size = inner.map.len();
            return None;
        }
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.to_string());
        inner.stats.hits += 1;
        inner.map.get(key).map(|e| e.value.clone())
    }

    /// `put(key, value)`. Idempotent: a second `put` for the same key
    /// replaces the value and refreshes LRU position but keeps the original
    /// `created_at`, so TTL continues from the first insertion (§4.2
    /// rationale: guard against rapid-refresh poisoning of TTL).
    pub fn put(&self, key: &str, value: CacheValue) {
        let mut inner = self.inner.lock().unwrap();
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.to_string());

        if let Some(entry) = inner.map.get_mut(key) {
            entry.value = value;
        } else {
            inner.map.insert(
                key.to_string(),
                Entry { value, created_at: Instant::now() },
            );
        }

        while inner.map.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            } else {
                break;
            }
        }
        inner.stats.size = inner.map.len();
    }

    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut inner = self.inner.lock().unwrap();
        let to_remove: Vec<String> = inner
            .map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in to_remove {
            inner.map.remove(&key);
            inner.order.retain(|k| k != &key);
        }
        inner.stats.size = inner.map.len();
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        inner.order.clear();
        inner.stats.size = 0;
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats.clone()
    }
}

/// Build a stable fingerprint of `(operation, pattern_or_rule, language,
/// target_path_canonical, relevant_opts)` (§4.2). Normalization: strip
/// trailing whitespace from the pattern, sort option maps, canonicalize the
/// path.
pub fn fingerprint(
    operation: &str,
    pattern_or_rule: &str,
    language: &str,
    target_path: &std::path::Path,
    relevant_opts: &std::collections::BTreeMap<String, String>,
) -> String {
    let canonical_path = target_path
        .canonicalize()
        .unwrap_or_else(|_| target_path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b"\0");
    hasher.update(pattern_or_rule.trim_end().as_bytes());
    hasher.update(b"\0");
    hasher.update(language.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_path.to_string_lossy().as_bytes());
    for (k, v) in relevant_opts {
        hasher.update(b"\0");
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn put_then_get_returns_value_before_ttl_expiry() {
        let cache = QueryCache::new(10, Duration::from_secs(60));
        cache.put("k", CacheValue::Text("v".into()));
        match cache.get("k") {
            Some(CacheValue::Text(v)) => assert_eq!(v, "v"),
            _ => panic!("expected hit"),
        }
    }

    #[test]
    fn get_after_ttl_expiry_is_a_miss() {
        let cache = QueryCache::new(10, Duration::from_millis(20));
        cache.put("k", CacheValue::Text("v".into()));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let cache = QueryCache::new(3, Duration::from_secs(60));
        for i in 0..10 {
            cache.put(&format!("k{i}"), CacheValue::Text(i.to_string()));
        }
        assert!(cache.stats().size <= 3);
    }

    #[test]
    fn lru_eviction_drops_least_recently_used() {
        let cache = QueryCache::new(2, Duration::from_secs(60));
        cache.put("a", CacheValue::Text("1".into()));
        cache.put("b", CacheValue::Text("2".into()));
        // touch "a" so "b" becomes the least-recently-used entry.
        let _ = cache.get("a");
        cache.put("c", CacheValue::Text("3".into()));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn put_over_existing_key_refreshes_lru_but_not_created_at() {
        let cache = QueryCache::new(10, Duration::from_millis(50));
        cache.put("k", CacheValue::Text("v1".into()));
        std::thread::sleep(Duration::from_millis(30));
        cache.put("k", CacheValue::Text("v2".into()));
        std::thread::sleep(Duration::from_millis(30));
        // 60ms since the *original* insertion > 50ms ttl: still a miss,
        // even though the value was refreshed in between.
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn fingerprint_is_stable_for_identical_inputs() {
        let opts = BTreeMap::new();
        let a = fingerprint("run_structural", "pattern", "python", std::path::Path::new("."), &opts);
        let b = fingerprint("run_structural", "pattern", "python", std::path::Path::new("."), &opts);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_strips_trailing_whitespace_from_pattern() {
        let opts = BTreeMap::new();
        let a = fingerprint("run_structural", "pattern  ", "python", std::path::Path::new("."), &opts);
        let b = fingerprint("run_structural", "pattern", "python", std::path::Path::new("."), &opts);
        assert_eq!(a, b);
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = QueryCache::new(10, Duration::from_secs(60));
        cache.put("k", CacheValue::Text("v".into()));
        let _ = cache.get("k");
        let _ = cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
