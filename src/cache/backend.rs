//! Key-value contract the cache layer requires of its backing store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cached value under `{key}` is not an integer")]
    NotAnInteger { key: String },
}

impl BackendError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Network-reachable key-value store shared by every worker.
///
/// Values are opaque strings. Implementations must be safe to call
/// concurrently and hold no exclusivity across calls.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Batched read. The result holds exactly one entry per requested key,
    /// `None` for keys that are absent, so a miss is distinguishable from a
    /// cached value without another round trip.
    async fn get_many(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, Option<String>>, BackendError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), BackendError>;

    async fn set_many(
        &self,
        entries: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), BackendError>;

    async fn delete_many(&self, keys: &[String]) -> Result<(), BackendError>;

    /// Atomically add one, treating an absent key as zero. Returns the new value.
    ///
    /// A key created by the increment expires after `ttl`; an existing key
    /// keeps its expiry.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, BackendError>;
}
