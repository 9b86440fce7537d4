//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::attributes::Attributes;
use crate::domain::entities::{CafeRecord, UserRecord};
use crate::domain::record::{FieldValue, Filter, Record, RecordId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Reject filters naming a column the record type does not expose.
pub fn validate_filter<R: Record>(filter: &Filter) -> Result<(), RepoError> {
    match filter
        .iter()
        .find(|(column, _)| !R::DESCRIPTOR.has_column(column))
    {
        Some((column, _)) => Err(RepoError::invalid_input(format!(
            "`{column}` is not a filterable column of {}",
            R::DESCRIPTOR.table
        ))),
        None => Ok(()),
    }
}

/// Read access to the authoritative store for one record type.
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    /// Look a record up by its full primary key.
    async fn fetch(&self, id: &RecordId) -> Result<Option<R>, RepoError>;

    /// Records whose single-column primary key is in `ids`, in no particular order.
    async fn fetch_many(&self, ids: &[FieldValue]) -> Result<Vec<R>, RepoError>;

    /// First record matching every equality condition.
    async fn first_matching(&self, filter: &Filter) -> Result<Option<R>, RepoError>;

    /// Number of records matching every equality condition.
    async fn count_matching(&self, filter: &Filter) -> Result<i64, RepoError>;
}

/// Post-commit notification points a persistence adapter must call.
///
/// Implementations are invoked only after the write transaction has been
/// durably committed, never on rollback. They cannot fail the write.
#[async_trait]
pub trait CommitHooks<R: Record>: Send + Sync {
    async fn after_insert(&self, record: &R);

    async fn after_update(&self, record: &R);

    async fn after_delete(&self, record: &R);
}

#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub username: String,
    pub email: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateUserParams {
    pub id: i64,
    pub email: String,
    pub description: Option<String>,
}

#[async_trait]
pub trait UsersWriteRepo: Send + Sync {
    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError>;

    async fn update_user(&self, params: UpdateUserParams) -> Result<UserRecord, RepoError>;

    /// Delete a user, returning the row as it was committed.
    async fn delete_user(&self, id: i64) -> Result<UserRecord, RepoError>;
}

#[derive(Debug, Clone)]
pub struct CreateCafeParams {
    pub slug: String,
    pub name: String,
    pub user_id: i64,
    pub status: i16,
    pub style: Attributes,
}

#[async_trait]
pub trait CafesWriteRepo: Send + Sync {
    async fn create_cafe(&self, params: CreateCafeParams) -> Result<CafeRecord, RepoError>;

    /// Flush the cafe's dirty columns. Returns `false` when nothing changed.
    async fn save_cafe(&self, cafe: &CafeRecord) -> Result<bool, RepoError>;

    async fn delete_cafe(&self, id: i64) -> Result<CafeRecord, RepoError>;
}
