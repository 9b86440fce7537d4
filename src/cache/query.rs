//! Cache-aware read surface over one record type.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::debug;

use crate::application::repos::{RecordStore, RepoError};
use crate::domain::record::{FieldValue, Filter, Record, RecordId};

use super::keys::{Category, KeySpace};
use super::{
    CacheLayer, METRIC_CACHE_BACKFILL, METRIC_CACHE_HIT, METRIC_CACHE_MISS,
    METRIC_STORE_QUERY_MS, QueryError, decode, encode,
};

/// How the caller wants an absent record reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    /// Structured error carrying the record type and identifier.
    Structured,
    /// Bare not-found signal.
    #[default]
    Plain,
}

impl ResponseFormat {
    pub fn is_structured(self) -> bool {
        matches!(self, Self::Structured)
    }
}

/// Read-through queries for `R`.
///
/// Single-record and filter lookups are never negatively cached: a lookup
/// that finds nothing always reaches the store again. Concurrent misses on
/// the same key each reach the store; the last backfill wins.
pub struct CacheQuery<R: Record> {
    layer: CacheLayer,
    store: Arc<dyn RecordStore<R>>,
}

impl<R: Record> Clone for CacheQuery<R> {
    fn clone(&self) -> Self {
        Self {
            layer: self.layer.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<R: Record> CacheQuery<R> {
    pub fn new(layer: CacheLayer, store: Arc<dyn RecordStore<R>>) -> Self {
        Self { layer, store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore<R>> {
        &self.store
    }

    fn keys(&self) -> &KeySpace {
        self.layer.keys()
    }

    /// Look a record up by primary key.
    pub async fn get(&self, id: impl Into<RecordId>) -> Result<Option<R>, QueryError> {
        let id = id.into();
        let key = self.keys().identity(&R::DESCRIPTOR, &id);
        if let Some(record) = self.layer.read::<R>(&key, Category::Get).await? {
            return Ok(Some(record));
        }

        let record = timed("fetch", self.store.fetch(&id)).await?;
        if let Some(record) = &record {
            self.layer.put(&key, record, Category::Get).await?;
            counter!(METRIC_CACHE_BACKFILL, "category" => Category::Get.code()).increment(1);
        }
        Ok(record)
    }

    /// Batched lookup keyed by the stringified primary key.
    ///
    /// Every requested id has an entry, `None` when neither the cache nor the
    /// store holds it. Issues at most one batched cache read, one batched
    /// store query and one batched cache write.
    pub async fn get_dict<I>(&self, ids: I) -> Result<HashMap<String, Option<R>>, QueryError>
    where
        I: IntoIterator,
        I::Item: Into<FieldValue>,
    {
        let ids: Vec<FieldValue> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        require_single_key::<R>()?;

        let prefix = self.keys().prefix(&R::DESCRIPTOR, Category::Get);
        let mut seen = HashSet::with_capacity(ids.len());
        let mut requested: Vec<(String, FieldValue, String)> = Vec::with_capacity(ids.len());
        for value in ids {
            let ident = value.to_string();
            if seen.insert(ident.clone()) {
                let key = KeySpace::identity_with_prefix(&prefix, &value);
                requested.push((ident, value, key));
            }
        }

        let keys: Vec<String> = requested.iter().map(|(_, _, key)| key.clone()).collect();
        let mut cached = self.layer.backend().get_many(&keys).await?;

        let mut found: HashMap<String, Option<R>> = HashMap::with_capacity(requested.len());
        let mut missed: Vec<FieldValue> = Vec::new();
        let mut key_by_ident: HashMap<String, String> = HashMap::new();
        for (ident, value, key) in requested {
            match cached.remove(&key).flatten() {
                Some(raw) => {
                    let record = decode::<R>(&key, &raw)?;
                    found.insert(ident, Some(record));
                }
                None => {
                    missed.push(value);
                    key_by_ident.insert(ident.clone(), key);
                    found.insert(ident, None);
                }
            }
        }

        let hits = found.len() - missed.len();
        counter!(METRIC_CACHE_HIT, "category" => Category::Get.code()).increment(hits as u64);
        counter!(METRIC_CACHE_MISS, "category" => Category::Get.code())
            .increment(missed.len() as u64);
        debug!(
            record = R::DESCRIPTOR.name,
            hits,
            misses = missed.len(),
            "batched cache lookup"
        );

        if missed.is_empty() {
            return Ok(found);
        }

        let records = timed("fetch_many", self.store.fetch_many(&missed)).await?;
        let mut backfill = HashMap::with_capacity(records.len());
        for record in records {
            let ident = record.record_id().suffix();
            let Some(key) = key_by_ident.get(&ident) else {
                continue;
            };
            backfill.insert(key.clone(), encode(key, &record)?);
            found.insert(ident, Some(record));
        }

        if !backfill.is_empty() {
            let filled = backfill.len() as u64;
            self.layer
                .backend()
                .set_many(backfill, self.layer.config().ttl(Category::Get))
                .await?;
            counter!(METRIC_CACHE_BACKFILL, "category" => Category::Get.code())
                .increment(filled);
        }
        Ok(found)
    }

    /// Found records in input order; ids with no record are skipped.
    pub async fn get_many<I>(&self, ids: I) -> Result<Vec<R>, QueryError>
    where
        I: IntoIterator,
        I::Item: Into<FieldValue>,
    {
        let aligned = self.get_many_aligned(ids).await?;
        Ok(aligned.into_iter().flatten().collect())
    }

    /// One slot per input id, `None` where no record exists.
    pub async fn get_many_aligned<I>(&self, ids: I) -> Result<Vec<Option<R>>, QueryError>
    where
        I: IntoIterator,
        I::Item: Into<FieldValue>,
    {
        let ids: Vec<FieldValue> = ids.into_iter().map(Into::into).collect();
        let found = self.get_dict(ids.iter().cloned()).await?;
        Ok(ids
            .iter()
            .map(|id| found.get(&id.to_string()).cloned().flatten())
            .collect())
    }

    /// First record matching `filter`, cached briefly and never invalidated.
    pub async fn filter_first(&self, filter: &Filter) -> Result<Option<R>, QueryError> {
        let key = self
            .keys()
            .filtered(&R::DESCRIPTOR, Category::FilterFirst, filter);
        if let Some(record) = self.layer.read::<R>(&key, Category::FilterFirst).await? {
            return Ok(Some(record));
        }

        let record = timed("first_matching", self.store.first_matching(filter)).await?;
        if let Some(record) = &record {
            self.layer.put(&key, record, Category::FilterFirst).await?;
            counter!(METRIC_CACHE_BACKFILL, "category" => Category::FilterFirst.code())
                .increment(1);
        }
        Ok(record)
    }

    /// Row count matching `filter`.
    ///
    /// An empty filter reads the per-type counter, which insert hooks advance
    /// and delete hooks drop.
    pub async fn filter_count(&self, filter: &Filter) -> Result<i64, QueryError> {
        let (key, category) = if filter.is_empty() {
            (self.keys().counter(&R::DESCRIPTOR), Category::Count)
        } else {
            (
                self.keys()
                    .filtered(&R::DESCRIPTOR, Category::FilterCount, filter),
                Category::FilterCount,
            )
        };
        if let Some(count) = self.layer.read::<i64>(&key, category).await? {
            return Ok(count);
        }

        let count = timed("count_matching", self.store.count_matching(filter)).await?;
        self.layer.put(&key, &count, category).await?;
        counter!(METRIC_CACHE_BACKFILL, "category" => category.code()).increment(1);
        Ok(count)
    }

    /// Total row count for `R`.
    pub async fn count(&self) -> Result<i64, QueryError> {
        self.filter_count(&Filter::new()).await
    }

    pub async fn get_or_404(
        &self,
        id: impl Into<RecordId>,
        format: ResponseFormat,
    ) -> Result<R, QueryError> {
        let id = id.into();
        let ident = id.suffix();
        self.get(id)
            .await?
            .ok_or_else(|| absent::<R>(format, Some(ident)))
    }

    /// Like [`Self::filter_first`], failing when nothing matches. The
    /// structured error names the value only for single-condition filters.
    pub async fn first_or_404(
        &self,
        filter: &Filter,
        format: ResponseFormat,
    ) -> Result<R, QueryError> {
        self.filter_first(filter).await?.ok_or_else(|| {
            absent::<R>(format, filter.single_value().map(ToString::to_string))
        })
    }
}

fn require_single_key<R: Record>() -> Result<&'static str, QueryError> {
    R::DESCRIPTOR
        .single_key()
        .ok_or(QueryError::UnsupportedKeyShape {
            record: R::DESCRIPTOR.name,
        })
}

fn absent<R: Record>(format: ResponseFormat, ident: Option<String>) -> QueryError {
    match format {
        ResponseFormat::Structured => QueryError::NotFound {
            record: R::DESCRIPTOR.name,
            ident,
        },
        ResponseFormat::Plain => QueryError::Missing,
    }
}

async fn timed<T>(
    op: &'static str,
    query: impl Future<Output = Result<T, RepoError>>,
) -> Result<T, QueryError> {
    let started_at = Instant::now();
    let result = query.await;
    histogram!(METRIC_STORE_QUERY_MS, "op" => op)
        .record(started_at.elapsed().as_secs_f64() * 1000.0);
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::domain::record::RecordDescriptor;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pair {
        left: i64,
        right: i64,
    }

    impl Record for Pair {
        const DESCRIPTOR: RecordDescriptor = RecordDescriptor {
            name: "Pair",
            table: "pairs",
            primary_key: &["left", "right"],
            columns: &["left", "right"],
            version: None,
        };

        fn record_id(&self) -> RecordId {
            RecordId::from((self.left, self.right))
        }
    }

    #[derive(Default)]
    struct PairStore {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore<Pair> for PairStore {
        async fn fetch(&self, id: &RecordId) -> Result<Option<Pair>, RepoError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(match id.values() {
                [FieldValue::Int(left), FieldValue::Int(right)] if left < right => Some(Pair {
                    left: *left,
                    right: *right,
                }),
                _ => None,
            })
        }

        async fn fetch_many(&self, _ids: &[FieldValue]) -> Result<Vec<Pair>, RepoError> {
            panic!("batch fetch must not be reached for composite keys");
        }

        async fn first_matching(&self, _filter: &Filter) -> Result<Option<Pair>, RepoError> {
            Ok(None)
        }

        async fn count_matching(&self, _filter: &Filter) -> Result<i64, RepoError> {
            Ok(0)
        }
    }

    fn query() -> (CacheQuery<Pair>, Arc<PairStore>) {
        let store = Arc::new(PairStore::default());
        let query = CacheLayer::in_memory().query(store.clone() as Arc<dyn RecordStore<Pair>>);
        (query, store)
    }

    #[tokio::test]
    async fn composite_keys_work_for_single_get() {
        let (query, store) = query();
        let first = query.get((1_i64, 2_i64)).await.expect("get");
        let second = query.get((1_i64, 2_i64)).await.expect("get");
        assert_eq!(first, Some(Pair { left: 1, right: 2 }));
        assert_eq!(first, second);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn composite_keys_are_rejected_by_batch_lookups() {
        let (query, _) = query();
        let err = query.get_dict([1_i64, 2]).await.expect_err("unsupported");
        assert!(matches!(
            err,
            QueryError::UnsupportedKeyShape { record: "Pair" }
        ));
        let err = query.get_many([1_i64]).await.expect_err("unsupported");
        assert!(matches!(err, QueryError::UnsupportedKeyShape { .. }));
    }

    #[tokio::test]
    async fn empty_batch_short_circuits_before_key_shape_check() {
        let (query, _) = query();
        let found = query
            .get_dict(Vec::<i64>::new())
            .await
            .expect("empty input");
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn misses_are_not_negatively_cached() {
        let (query, store) = query();
        assert_eq!(query.get((2_i64, 1_i64)).await.expect("get"), None);
        assert_eq!(query.get((2_i64, 1_i64)).await.expect("get"), None);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn get_or_404_reports_by_format() {
        let (query, _) = query();
        let structured = query
            .get_or_404((3_i64, 1_i64), ResponseFormat::Structured)
            .await
            .expect_err("absent");
        assert_eq!(structured.to_string(), "Pair \"3-1\" not found");

        let plain = query
            .get_or_404((3_i64, 1_i64), ResponseFormat::Plain)
            .await
            .expect_err("absent");
        assert!(matches!(plain, QueryError::Missing));
    }

    #[tokio::test]
    async fn first_or_404_names_value_only_for_single_condition() {
        let (query, _) = query();
        let single = query
            .first_or_404(&Filter::new().eq("left", 9_i64), ResponseFormat::Structured)
            .await
            .expect_err("absent");
        assert_eq!(single.to_string(), "Pair \"9\" not found");

        let double = query
            .first_or_404(
                &Filter::new().eq("left", 9_i64).eq("right", 10_i64),
                ResponseFormat::Structured,
            )
            .await
            .expect_err("absent");
        assert_eq!(double.to_string(), "Pair not found");
    }

    #[test]
    fn default_format_is_plain() {
        assert_eq!(ResponseFormat::default(), ResponseFormat::Plain);
        assert!(ResponseFormat::Structured.is_structured());
    }
}
