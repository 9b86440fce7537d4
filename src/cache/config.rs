//! Cache configuration.
//!
//! Controls key namespace and per-category TTLs via `tavern.toml`:
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! namespace = "db"
//! memory_capacity = 10000
//! ttl_filter_first_seconds = 120
//! ```

use std::num::NonZeroUsize;
use std::time::Duration;

use super::keys::{Category, DEFAULT_NAMESPACE, KeySpace};

/// Entry limit for the in-process backend when none is configured.
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Resolved cache-layer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Leading key segment shared by every entry.
    pub namespace: String,
    /// Maximum entries held by the in-process backend before LRU eviction.
    pub memory_capacity: usize,
    /// TTL for single-record entries.
    pub ttl_get: Duration,
    /// TTL for the per-type counter.
    pub ttl_count: Duration,
    /// TTL for filter-first entries.
    pub ttl_filter_first: Duration,
    /// TTL for filter-count entries.
    pub ttl_filter_count: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            ttl_get: Category::Get.default_ttl(),
            ttl_count: Category::Count.default_ttl(),
            ttl_filter_first: Category::FilterFirst.default_ttl(),
            ttl_filter_count: Category::FilterCount.default_ttl(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            namespace: settings.namespace.clone(),
            memory_capacity: settings.memory_capacity,
            ttl_get: settings.ttl_get,
            ttl_count: settings.ttl_count,
            ttl_filter_first: settings.ttl_filter_first,
            ttl_filter_count: settings.ttl_filter_count,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self, category: Category) -> Duration {
        match category {
            Category::Get => self.ttl_get,
            Category::Count => self.ttl_count,
            Category::FilterFirst => self.ttl_filter_first,
            Category::FilterCount => self.ttl_filter_count,
        }
    }

    /// Returns the in-process capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn key_space(&self) -> KeySpace {
        KeySpace::new(self.namespace.clone())
    }
}
