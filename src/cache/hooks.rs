//! Post-commit cache maintenance.

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, warn};

use crate::application::repos::CommitHooks;
use crate::domain::record::Record;

use super::keys::Category;
use super::{CacheLayer, METRIC_HOOK_FAILURE, QueryError};

/// Keeps identity entries and per-type counters coherent with committed writes.
///
/// Filter entries (`ff`/`fc`) are left alone and age out through their TTL.
#[derive(Clone)]
pub struct InvalidationHooks {
    layer: CacheLayer,
}

impl InvalidationHooks {
    pub(crate) fn new(layer: CacheLayer) -> Self {
        Self { layer }
    }

    /// Advance the counter. The identity entry is populated lazily on first read.
    pub async fn record_inserted<R: Record>(&self, _record: &R) -> Result<i64, QueryError> {
        let key = self.layer.keys().counter(&R::DESCRIPTOR);
        let ttl = self.layer.config().ttl(Category::Count);
        let count = self.layer.backend().increment(&key, ttl).await?;
        debug!(key = %key, count, "counter advanced");
        Ok(count)
    }

    /// Write the committed record through to its identity entry.
    pub async fn record_updated<R: Record>(&self, record: &R) -> Result<(), QueryError> {
        let key = self
            .layer
            .keys()
            .identity(&R::DESCRIPTOR, &record.record_id());
        self.layer.put(&key, record, Category::Get).await?;
        debug!(key = %key, "identity entry written through");
        Ok(())
    }

    /// Drop the identity entry and the counter in one call; the next count
    /// recomputes from the store.
    pub async fn record_deleted<R: Record>(&self, record: &R) -> Result<(), QueryError> {
        let keys = [
            self.layer
                .keys()
                .identity(&R::DESCRIPTOR, &record.record_id()),
            self.layer.keys().counter(&R::DESCRIPTOR),
        ];
        self.layer.backend().delete_many(&keys).await?;
        debug!(identity = %keys[0], counter = %keys[1], "identity and counter dropped");
        Ok(())
    }
}

fn swallow<T>(hook: &'static str, record: &'static str, result: Result<T, QueryError>) {
    if let Err(err) = result {
        counter!(METRIC_HOOK_FAILURE, "hook" => hook).increment(1);
        warn!(
            hook,
            record,
            error = %err,
            "cache maintenance failed after commit; entry may be stale until TTL"
        );
    }
}

#[async_trait]
impl<R: Record> CommitHooks<R> for InvalidationHooks {
    async fn after_insert(&self, record: &R) {
        swallow("insert", R::DESCRIPTOR.name, self.record_inserted(record).await);
    }

    async fn after_update(&self, record: &R) {
        swallow("update", R::DESCRIPTOR.name, self.record_updated(record).await);
    }

    async fn after_delete(&self, record: &R) {
        swallow("delete", R::DESCRIPTOR.name, self.record_deleted(record).await);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::cache::{BackendError, CacheBackend, CacheConfig, MemoryBackend};
    use crate::domain::record::{RecordDescriptor, RecordId};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: i64,
        body: String,
    }

    impl Record for Note {
        const DESCRIPTOR: RecordDescriptor = RecordDescriptor {
            name: "Note",
            table: "notes",
            primary_key: &["id"],
            columns: &["id"],
            version: None,
        };

        fn record_id(&self) -> RecordId {
            RecordId::from(self.id)
        }
    }

    fn note(id: i64, body: &str) -> Note {
        Note {
            id,
            body: body.to_string(),
        }
    }

    struct DownBackend;

    #[async_trait]
    impl CacheBackend for DownBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, BackendError> {
            Err(BackendError::unavailable("down"))
        }

        async fn get_many(
            &self,
            _keys: &[String],
        ) -> Result<HashMap<String, Option<String>>, BackendError> {
            Err(BackendError::unavailable("down"))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), BackendError> {
            Err(BackendError::unavailable("down"))
        }

        async fn set_many(
            &self,
            _entries: HashMap<String, String>,
            _ttl: Duration,
        ) -> Result<(), BackendError> {
            Err(BackendError::unavailable("down"))
        }

        async fn delete_many(&self, _keys: &[String]) -> Result<(), BackendError> {
            Err(BackendError::unavailable("down"))
        }

        async fn increment(&self, _key: &str, _ttl: Duration) -> Result<i64, BackendError> {
            Err(BackendError::unavailable("down"))
        }
    }

    #[tokio::test]
    async fn insert_increments_counter_only() {
        let backend = Arc::new(MemoryBackend::new());
        let layer = CacheLayer::new(backend.clone(), CacheConfig::default());
        let hooks = layer.hooks();

        assert_eq!(hooks.record_inserted(&note(1, "a")).await.expect("insert"), 1);
        assert_eq!(hooks.record_inserted(&note(2, "b")).await.expect("insert"), 2);
        assert!(backend.contains("db:count:notes:"));
        assert!(!backend.contains("db:get:notes:1"));
    }

    #[tokio::test]
    async fn update_overwrites_identity_entry() {
        let backend = Arc::new(MemoryBackend::new());
        let layer = CacheLayer::new(backend.clone(), CacheConfig::default());
        let hooks = layer.hooks();

        hooks.record_updated(&note(1, "old")).await.expect("update");
        hooks.record_updated(&note(1, "new")).await.expect("update");

        let cached: Option<Note> = layer
            .read("db:get:notes:1", Category::Get)
            .await
            .expect("read");
        assert_eq!(cached, Some(note(1, "new")));
    }

    #[tokio::test]
    async fn delete_drops_identity_and_counter() {
        let backend = Arc::new(MemoryBackend::new());
        let layer = CacheLayer::new(backend.clone(), CacheConfig::default());
        let hooks = layer.hooks();

        hooks.record_inserted(&note(1, "a")).await.expect("insert");
        hooks.record_updated(&note(1, "a")).await.expect("update");
        hooks.record_deleted(&note(1, "a")).await.expect("delete");

        assert!(!backend.contains("db:get:notes:1"));
        assert!(!backend.contains("db:count:notes:"));
        assert_eq!(backend.stats().deletes, 1);
    }

    #[tokio::test]
    async fn commit_hooks_swallow_backend_failures() {
        let layer = CacheLayer::new(Arc::new(DownBackend), CacheConfig::default());
        let hooks = layer.hooks();

        assert!(hooks.record_inserted(&note(1, "a")).await.is_err());
        CommitHooks::<Note>::after_insert(&hooks, &note(1, "a")).await;
        CommitHooks::<Note>::after_update(&hooks, &note(1, "a")).await;
        CommitHooks::<Note>::after_delete(&hooks, &note(1, "a")).await;
    }
}
