//! Tavern cache-aside layer
//!
//! Sits between application queries and the relational store:
//!
//! - **Reads** go through [`CacheQuery`]: the cache is consulted first, the
//!   store on a miss, and the cache is backfilled with what the store found.
//! - **Writes** commit to the store first; [`InvalidationHooks`] then keep the
//!   identity and counter entries coherent.
//!
//! ## Configuration
//!
//! Cache behaviour is controlled via `tavern.toml`:
//!
//! ```toml
//! [cache]
//! backend = "memory"
//! namespace = "db"
//! ttl_get_seconds = 86400
//! # ... see config.rs for all options
//! ```

mod backend;
mod config;
mod error;
mod hooks;
mod keys;
mod memory;
mod query;
#[cfg(feature = "redis")]
mod redis;

use std::sync::Arc;

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::application::repos::RecordStore;
use crate::domain::record::Record;

pub use backend::{BackendError, CacheBackend};
pub use config::{CacheConfig, DEFAULT_MEMORY_CAPACITY};
pub use error::QueryError;
pub use hooks::InvalidationHooks;
pub use keys::{Category, DEFAULT_NAMESPACE, KeySpace};
pub use memory::{BackendStats, MemoryBackend};
pub use query::{CacheQuery, ResponseFormat};
#[cfg(feature = "redis")]
pub use redis::RedisBackend;

pub(crate) const METRIC_CACHE_HIT: &str = "tavern_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "tavern_cache_miss_total";
pub(crate) const METRIC_CACHE_BACKFILL: &str = "tavern_cache_backfill_total";
pub(crate) const METRIC_HOOK_FAILURE: &str = "tavern_cache_hook_failure_total";
pub(crate) const METRIC_STORE_QUERY_MS: &str = "tavern_store_query_ms";

/// Shared handle to a cache backend plus key and TTL policy.
///
/// Cloning is cheap; every clone talks to the same backend.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    config: Arc<CacheConfig>,
    keys: KeySpace,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        let keys = config.key_space();
        Self {
            backend,
            config: Arc::new(config),
            keys,
        }
    }

    /// In-process layer with default configuration.
    pub fn in_memory() -> Self {
        let config = CacheConfig::default();
        Self::new(Arc::new(MemoryBackend::from_config(&config)), config)
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Cache-aware read surface over `store`.
    pub fn query<R: Record>(&self, store: Arc<dyn RecordStore<R>>) -> CacheQuery<R> {
        CacheQuery::new(self.clone(), store)
    }

    /// Post-commit hooks bound to this layer.
    pub fn hooks(&self) -> InvalidationHooks {
        InvalidationHooks::new(self.clone())
    }

    pub(crate) async fn read<T: DeserializeOwned>(
        &self,
        key: &str,
        category: Category,
    ) -> Result<Option<T>, QueryError> {
        match self.backend.get(key).await? {
            Some(raw) => {
                counter!(METRIC_CACHE_HIT, "category" => category.code()).increment(1);
                debug!(key, category = category.code(), "cache hit");
                decode(key, &raw).map(Some)
            }
            None => {
                counter!(METRIC_CACHE_MISS, "category" => category.code()).increment(1);
                debug!(key, category = category.code(), "cache miss");
                Ok(None)
            }
        }
    }

    pub(crate) async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        category: Category,
    ) -> Result<(), QueryError> {
        let encoded = encode(key, value)?;
        self.backend
            .set(key, encoded, self.config.ttl(category))
            .await?;
        Ok(())
    }
}

pub(crate) fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, QueryError> {
    serde_json::to_string(value).map_err(|source| QueryError::Codec {
        key: key.to_string(),
        source,
    })
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, QueryError> {
    serde_json::from_str(raw).map_err(|source| QueryError::Codec {
        key: key.to_string(),
        source,
    })
}
