//! In-process TTL cache for query results.
//!
//! `remember` memoizes a producer per key; writes evict by owner-scoped key
//! prefix. The cache never surfaces its own failures — a miss (or an evicted
//! entry) just recomputes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// TTL key-value cache. A single shared instance per namespace lives in
/// `AppContext`; interior mutability keeps callers lock-free.
pub struct TtlCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<T>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry<T>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a live entry. Expired entries are dropped and count as misses.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut map = self.lock();
        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                map.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: &str, value: T) {
        let entry = Entry { value, expires_at: Instant::now() + self.ttl };
        self.lock().insert(key.to_string(), entry);
    }

    /// On hit, return the cached value; on miss, compute via `produce`, store
    /// with the cache TTL, and return it. Producer errors pass straight
    /// through and nothing is stored.
    pub async fn remember<F, Fut>(&self, key: &str, produce: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        // Two callers may race here and both compute; last insert wins.
        let value = produce().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Remove every entry whose key starts with `prefix`. Returns the number
    /// of entries evicted.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|key, _| !key.starts_with(prefix));
        before - map.len()
    }

    /// Drop expired entries. Called periodically by the purge job.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, entry| entry.expires_at > now);
        before - map.len()
    }

    /// Hit rate 0.0–1.0, or 0.0 before any request.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remember_computes_once_within_ttl() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(60));
        let v1 = cache.remember("k", || async { Ok(1) }).await.unwrap();
        // Second producer would return a different value — must not run.
        let v2 = cache.remember("k", || async { Ok(2) }).await.unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 1);
    }

    #[tokio::test]
    async fn expired_entries_recompute() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::ZERO);
        let _ = cache.remember("k", || async { Ok(1) }).await.unwrap();
        let v = cache.remember("k", || async { Ok(2) }).await.unwrap();
        assert_eq!(v, 2);
    }

    #[tokio::test]
    async fn producer_errors_are_not_cached() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(60));
        let err = cache
            .remember("k", || async { Err(anyhow::anyhow!("backend down")) })
            .await;
        assert!(err.is_err());
        let v = cache.remember("k", || async { Ok(7) }).await.unwrap();
        assert_eq!(v, 7);
    }

    #[test]
    fn invalidate_prefix_spares_other_namespaces() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("tasks:1:aaa", 1);
        cache.insert("tasks:1:bbb", 2);
        cache.insert("tasks:2:aaa", 3);
        cache.insert("tasks:search:1:aaa", 4);

        let evicted = cache.invalidate_prefix("tasks:1:");
        assert_eq!(evicted, 2);
        assert!(cache.get("tasks:1:aaa").is_none());
        assert!(cache.get("tasks:2:aaa").is_some());
        assert!(cache.get("tasks:search:1:aaa").is_some());
    }

    #[test]
    fn purge_drops_only_expired() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::ZERO);
        cache.insert("old", 1);
        let purged = cache.purge_expired();
        assert_eq!(purged, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn hit_rate_tracks_lookups() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.hit_rate(), 0.0);
        assert!(cache.get("k").is_none()); // miss
        cache.insert("k", 1);
        assert!(cache.get("k").is_some()); // hit
        assert!((cache.hit_rate() - 0.5).abs() < 1e-9);
    }
}
