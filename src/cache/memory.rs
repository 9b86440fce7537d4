//! In-process cache backend.
//!
//! Suitable for a single worker and for tests. Entries live in an LRU bounded
//! by [`CacheConfig::memory_capacity`]; expiry is checked against the tokio
//! clock when a key is touched, so paused-time tests can step past a TTL.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::time::Instant;

use crate::util::lock::{rw_read, rw_write};

use super::backend::{BackendError, CacheBackend};
use super::config::{CacheConfig, DEFAULT_MEMORY_CAPACITY};

const SOURCE: &str = "cache::memory";

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn new(value: String, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            expires_at: now + ttl,
        }
    }

    fn live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Call counts, by operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub gets: u64,
    pub batch_gets: u64,
    pub sets: u64,
    pub batch_sets: u64,
    pub deletes: u64,
    pub increments: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    batch_gets: AtomicU64,
    sets: AtomicU64,
    batch_sets: AtomicU64,
    deletes: AtomicU64,
    increments: AtomicU64,
    evictions: AtomicU64,
}

pub struct MemoryBackend {
    entries: RwLock<LruCache<String, Entry>>,
    counters: Counters,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_capacity(
            NonZeroUsize::new(DEFAULT_MEMORY_CAPACITY).unwrap_or(NonZeroUsize::MIN),
        )
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            counters: Counters::default(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_capacity(config.memory_capacity_non_zero())
    }

    pub fn stats(&self) -> BackendStats {
        let c = &self.counters;
        BackendStats {
            gets: c.gets.load(Ordering::Relaxed),
            batch_gets: c.batch_gets.load(Ordering::Relaxed),
            sets: c.sets.load(Ordering::Relaxed),
            batch_sets: c.batch_sets.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            increments: c.increments.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }

    /// Whether `key` currently holds a live value. Does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        rw_read(&self.entries, SOURCE, "contains")
            .peek(key)
            .is_some_and(|entry| entry.live(now))
    }

    /// Number of stored entries, including expired ones not yet touched.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        rw_read(&self.entries, SOURCE, "capacity").cap().get()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "purge_expired");
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    fn store(&self, entries: &mut LruCache<String, Entry>, key: String, entry: Entry) {
        // `push` hands back the replaced entry too; only a different key is an eviction.
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Live value for `key`, removing it if it has expired.
fn take_live(entries: &mut LruCache<String, Entry>, key: &str, now: Instant) -> Option<String> {
    let found = entries
        .get(key)
        .map(|entry| entry.live(now).then(|| entry.value.clone()));
    match found {
        Some(Some(value)) => Some(value),
        Some(None) => {
            entries.pop(key);
            None
        }
        None => None,
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        Ok(take_live(&mut entries, key, Instant::now()))
    }

    async fn get_many(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, Option<String>>, BackendError> {
        self.counters.batch_gets.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "get_many");
        Ok(keys
            .iter()
            .map(|key| (key.clone(), take_live(&mut entries, key, now)))
            .collect())
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), BackendError> {
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        let entry = Entry::new(value, ttl, Instant::now());
        let mut entries = rw_write(&self.entries, SOURCE, "set");
        self.store(&mut entries, key.to_string(), entry);
        Ok(())
    }

    async fn set_many(
        &self,
        batch: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        self.counters.batch_sets.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "set_many");
        for (key, value) in batch {
            self.store(&mut entries, key, Entry::new(value, ttl, now));
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), BackendError> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        let mut entries = rw_write(&self.entries, SOURCE, "delete_many");
        for key in keys {
            entries.pop(key.as_str());
        }
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, BackendError> {
        self.counters.increments.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "increment");
        if let Some(entry) = entries.get_mut(key).filter(|entry| entry.live(now)) {
            let current: i64 = entry
                .value
                .parse()
                .map_err(|_| BackendError::NotAnInteger {
                    key: key.to_string(),
                })?;
            let next = current + 1;
            entry.value = next.to_string();
            return Ok(next);
        }
        self.store(&mut entries, key.to_string(), Entry::new("1".to_string(), ttl, now));
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_and_present_keys_are_distinguishable() {
        let backend = MemoryBackend::new();
        backend
            .set("a", String::new(), Duration::from_secs(60))
            .await
            .expect("set");

        let keys = vec!["a".to_string(), "b".to_string()];
        let values = backend.get_many(&keys).await.expect("get_many");
        assert_eq!(values.len(), 2);
        assert_eq!(values["a"], Some(String::new()));
        assert_eq!(values["b"], None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let backend = MemoryBackend::new();
        backend
            .set("k", "v".to_string(), Duration::from_secs(5))
            .await
            .expect("set");
        assert_eq!(backend.get("k").await.expect("get"), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(backend.get("k").await.expect("get"), None);
        assert!(backend.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_untouched_expired_entries() {
        let backend = MemoryBackend::new();
        backend
            .set("short", "v".to_string(), Duration::from_secs(5))
            .await
            .expect("set");
        backend
            .set("long", "v".to_string(), Duration::from_secs(60))
            .await
            .expect("set");

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(backend.purge_expired(), 1);
        assert_eq!(backend.len(), 1);
        assert!(backend.contains("long"));
    }

    #[tokio::test]
    async fn writes_past_capacity_evict_least_recently_used() {
        let backend = MemoryBackend::with_capacity(NonZeroUsize::new(2).expect("non-zero"));
        let ttl = Duration::from_secs(60);
        backend.set("a", "1".to_string(), ttl).await.expect("set");
        backend.set("b", "2".to_string(), ttl).await.expect("set");
        backend.get("a").await.expect("touch a");
        backend.set("c", "3".to_string(), ttl).await.expect("set");

        assert!(backend.contains("a"));
        assert!(!backend.contains("b"));
        assert!(backend.contains("c"));
        assert_eq!(backend.stats().evictions, 1);

        backend.set("c", "4".to_string(), ttl).await.expect("overwrite");
        assert_eq!(backend.stats().evictions, 1);
        assert_eq!(backend.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_filter_keys_stay_bounded() {
        let config = CacheConfig {
            memory_capacity: 100,
            ..CacheConfig::default()
        };
        let backend = MemoryBackend::from_config(&config);
        for i in 0..10_000 {
            backend
                .set(
                    &format!("db:ff:users|1:username$u{i}"),
                    "{}".to_string(),
                    Duration::from_secs(1),
                )
                .await
                .expect("set");
        }
        assert_eq!(backend.len(), 100);
        assert_eq!(backend.stats().evictions, 9_900);

        tokio::time::advance(Duration::from_secs(10)).await;
        let recent: Vec<String> = (9_990..10_000)
            .map(|i| format!("db:ff:users|1:username$u{i}"))
            .collect();
        let values = backend.get_many(&recent).await.expect("get_many");
        assert!(values.values().all(Option::is_none));
        assert_eq!(backend.len(), 90);
    }

    #[tokio::test]
    async fn increment_initializes_absent_keys() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(backend.increment("n", ttl).await.expect("incr"), 1);
        assert_eq!(backend.increment("n", ttl).await.expect("incr"), 2);
        assert_eq!(backend.get("n").await.expect("get"), Some("2".to_string()));
    }

    #[tokio::test]
    async fn increment_rejects_non_integers() {
        let backend = MemoryBackend::new();
        backend
            .set("n", "{}".to_string(), Duration::from_secs(60))
            .await
            .expect("set");
        let err = backend
            .increment("n", Duration::from_secs(60))
            .await
            .expect_err("not an integer");
        assert!(matches!(err, BackendError::NotAnInteger { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn increment_keeps_existing_ttl() {
        let backend = MemoryBackend::new();
        backend
            .set("n", "10".to_string(), Duration::from_secs(5))
            .await
            .expect("set");
        assert_eq!(
            backend
                .increment("n", Duration::from_secs(3_600))
                .await
                .expect("incr"),
            11
        );

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!backend.contains("n"));
    }

    #[tokio::test(start_paused = true)]
    async fn created_counters_expire_after_ttl() {
        let backend = MemoryBackend::new();
        assert_eq!(
            backend
                .increment("n", Duration::from_secs(30))
                .await
                .expect("incr"),
            1
        );

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!backend.contains("n"));
        assert_eq!(
            backend
                .increment("n", Duration::from_secs(30))
                .await
                .expect("incr"),
            1
        );
    }

    #[tokio::test]
    async fn delete_many_removes_every_key() {
        let backend = MemoryBackend::new();
        let mut batch = HashMap::new();
        batch.insert("x".to_string(), "1".to_string());
        batch.insert("y".to_string(), "2".to_string());
        backend
            .set_many(batch, Duration::from_secs(60))
            .await
            .expect("set_many");

        backend
            .delete_many(&["x".to_string(), "y".to_string(), "z".to_string()])
            .await
            .expect("delete");
        assert!(backend.is_empty());
        assert_eq!(backend.stats().deletes, 1);
        assert_eq!(backend.stats().batch_sets, 1);
    }
}
