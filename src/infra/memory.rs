//! In-process record store for tests and local development.
//!
//! Mirrors the Postgres adapters: filters are validated against the record
//! descriptor, writes "commit" under the lock and only then notify hooks.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

use crate::application::repos::{
    CafesWriteRepo, CommitHooks, CreateCafeParams, CreateUserParams, RecordStore, RepoError,
    UpdateUserParams, UsersWriteRepo, validate_filter,
};
use crate::domain::entities::{CafeRecord, UserRecord};
use crate::domain::record::{FieldValue, Filter, Record, RecordId};
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "infra::memory";

/// Call counts, by read operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub fetches: u64,
    pub batch_fetches: u64,
    pub first_matching: u64,
    pub counts: u64,
}

#[derive(Default)]
struct Counters {
    fetches: AtomicU64,
    batch_fetches: AtomicU64,
    first_matching: AtomicU64,
    counts: AtomicU64,
}

pub struct InMemoryStore<R: Record> {
    rows: RwLock<Vec<R>>,
    hooks: RwLock<Vec<Arc<dyn CommitHooks<R>>>>,
    next_id: AtomicI64,
    fail_next_commit: AtomicBool,
    counters: Counters,
}

impl<R: Record> Default for InMemoryStore<R> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            hooks: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            fail_next_commit: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }
}

impl<R: Record> InMemoryStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a post-commit listener.
    pub fn subscribe(&self, hooks: Arc<dyn CommitHooks<R>>) {
        rw_write(&self.hooks, SOURCE, "subscribe").push(hooks);
    }

    /// Insert rows directly, bypassing hooks, as if they predate the cache.
    pub fn seed(&self, records: impl IntoIterator<Item = R>) {
        let mut rows = rw_write(&self.rows, SOURCE, "seed");
        rows.extend(records);
    }

    /// Make the next write fail at commit time, as a rolled-back transaction.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.counters;
        StoreStats {
            fetches: c.fetches.load(Ordering::SeqCst),
            batch_fetches: c.batch_fetches.load(Ordering::SeqCst),
            first_matching: c.first_matching.load(Ordering::SeqCst),
            counts: c.counts.load(Ordering::SeqCst),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.rows, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn commit(&self) -> Result<(), RepoError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(RepoError::from_persistence("commit failed; rolled back"));
        }
        Ok(())
    }

    fn listeners(&self) -> Vec<Arc<dyn CommitHooks<R>>> {
        rw_read(&self.hooks, SOURCE, "listeners").clone()
    }

    /// Commit a new row and fire `after_insert`.
    pub async fn insert(&self, record: R) -> Result<R, RepoError> {
        self.insert_unique(record, None).await
    }

    /// Like [`InMemoryStore::insert`], also enforcing a unique column.
    ///
    /// The uniqueness check and the push happen under one write lock, so
    /// concurrent inserts cannot both claim the same value.
    async fn insert_unique(
        &self,
        record: R,
        unique: Option<(&Filter, &str)>,
    ) -> Result<R, RepoError> {
        {
            let mut rows = rw_write(&self.rows, SOURCE, "insert");
            let id = record.record_id();
            if rows.iter().any(|row| row.record_id() == id) {
                return Err(RepoError::Duplicate {
                    constraint: format!("{}_pkey", R::DESCRIPTOR.table),
                });
            }
            if let Some((filter, constraint)) = unique {
                for row in rows.iter() {
                    if matches_filter(row, filter)? {
                        return Err(RepoError::Duplicate {
                            constraint: constraint.to_string(),
                        });
                    }
                }
            }
            self.commit()?;
            rows.push(record.clone());
        }
        for hooks in self.listeners() {
            hooks.after_insert(&record).await;
        }
        Ok(record)
    }

    /// Commit a replacement row and fire `after_update`.
    pub async fn update(&self, record: R) -> Result<R, RepoError> {
        {
            let mut rows = rw_write(&self.rows, SOURCE, "update");
            let id = record.record_id();
            let slot = rows
                .iter_mut()
                .find(|row| row.record_id() == id)
                .ok_or(RepoError::NotFound)?;
            self.commit()?;
            *slot = record.clone();
        }
        for hooks in self.listeners() {
            hooks.after_update(&record).await;
        }
        Ok(record)
    }

    /// Commit a removal and fire `after_delete` with the removed row.
    pub async fn delete(&self, id: &RecordId) -> Result<R, RepoError> {
        let removed = {
            let mut rows = rw_write(&self.rows, SOURCE, "delete");
            let position = rows
                .iter()
                .position(|row| &row.record_id() == id)
                .ok_or(RepoError::NotFound)?;
            self.commit()?;
            rows.remove(position)
        };
        for hooks in self.listeners() {
            hooks.after_delete(&removed).await;
        }
        Ok(removed)
    }

    fn find(&self, id: &RecordId) -> Option<R> {
        rw_read(&self.rows, SOURCE, "find")
            .iter()
            .find(|row| &row.record_id() == id)
            .cloned()
    }

    fn matching(&self, filter: &Filter) -> Result<Vec<R>, RepoError> {
        validate_filter::<R>(filter)?;
        let rows = rw_read(&self.rows, SOURCE, "matching");
        let mut matched = Vec::new();
        for row in rows.iter() {
            if matches_filter(row, filter)? {
                matched.push(row.clone());
            }
        }
        Ok(matched)
    }
}

fn matches_filter<R: Record>(row: &R, filter: &Filter) -> Result<bool, RepoError> {
    let encoded = serde_json::to_value(row).map_err(RepoError::from_persistence)?;
    Ok(filter
        .iter()
        .all(|(column, value)| encoded.get(column).is_some_and(|field| same(field, value))))
}

fn same(field: &Value, value: &FieldValue) -> bool {
    match (field, value) {
        (Value::Number(number), FieldValue::Int(expected)) => number.as_i64() == Some(*expected),
        (Value::String(text), FieldValue::Text(expected)) => text == expected,
        (Value::String(text), FieldValue::Uuid(expected)) => {
            *text == expected.hyphenated().to_string()
        }
        (Value::Bool(flag), FieldValue::Bool(expected)) => flag == expected,
        _ => false,
    }
}

#[async_trait]
impl<R: Record> RecordStore<R> for InMemoryStore<R> {
    async fn fetch(&self, id: &RecordId) -> Result<Option<R>, RepoError> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.find(id))
    }

    async fn fetch_many(&self, ids: &[FieldValue]) -> Result<Vec<R>, RepoError> {
        self.counters.batch_fetches.fetch_add(1, Ordering::SeqCst);
        if R::DESCRIPTOR.single_key().is_none() {
            return Err(RepoError::invalid_input(format!(
                "{} has a composite primary key",
                R::DESCRIPTOR.table
            )));
        }
        let wanted: HashSet<&FieldValue> = ids.iter().collect();
        let rows = rw_read(&self.rows, SOURCE, "fetch_many");
        Ok(rows
            .iter()
            .filter(|row| {
                row.record_id()
                    .values()
                    .first()
                    .is_some_and(|value| wanted.contains(value))
            })
            .cloned()
            .collect())
    }

    async fn first_matching(&self, filter: &Filter) -> Result<Option<R>, RepoError> {
        self.counters.first_matching.fetch_add(1, Ordering::SeqCst);
        Ok(self.matching(filter)?.into_iter().next())
    }

    async fn count_matching(&self, filter: &Filter) -> Result<i64, RepoError> {
        self.counters.counts.fetch_add(1, Ordering::SeqCst);
        let count = self.matching(filter)?.len();
        i64::try_from(count).map_err(|_| RepoError::from_persistence("count exceeds i64"))
    }
}

#[async_trait]
impl UsersWriteRepo for InMemoryStore<UserRecord> {
    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError> {
        let unique = Filter::new().eq("username", params.username.as_str());
        validate_filter::<UserRecord>(&unique)?;
        let user = UserRecord {
            id: self.allocate_id(),
            username: params.username,
            email: params.email,
            description: params.description,
            role: 0,
            reputation: 0,
            created_at: OffsetDateTime::now_utc(),
        };
        self.insert_unique(user, Some((&unique, "users_username_key")))
            .await
    }

    async fn update_user(&self, params: UpdateUserParams) -> Result<UserRecord, RepoError> {
        let mut user = self
            .find(&RecordId::from(params.id))
            .ok_or(RepoError::NotFound)?;
        user.email = params.email;
        user.description = params.description;
        self.update(user).await
    }

    async fn delete_user(&self, id: i64) -> Result<UserRecord, RepoError> {
        self.delete(&RecordId::from(id)).await
    }
}

#[async_trait]
impl CafesWriteRepo for InMemoryStore<CafeRecord> {
    async fn create_cafe(&self, params: CreateCafeParams) -> Result<CafeRecord, RepoError> {
        let unique = Filter::new().eq("slug", params.slug.as_str());
        validate_filter::<CafeRecord>(&unique)?;
        let cafe = CafeRecord::new(
            self.allocate_id(),
            params.slug,
            params.name,
            params.user_id,
            params.status,
            params.style,
            OffsetDateTime::now_utc(),
        );
        self.insert_unique(cafe, Some((&unique, "cafes_slug_key")))
            .await
    }

    async fn save_cafe(&self, cafe: &CafeRecord) -> Result<bool, RepoError> {
        if !cafe.dirty_fields().is_dirty() {
            return Ok(false);
        }
        // The stored row starts clean, like one read back from Postgres.
        let committed = cafe.clone();
        committed.dirty_fields().take();
        self.update(committed).await?;
        cafe.dirty_fields().take();
        Ok(true)
    }

    async fn delete_cafe(&self, id: i64) -> Result<CafeRecord, RepoError> {
        self.delete(&RecordId::from(id)).await
    }
}
