//! Postgres-backed repository implementations.

mod cafes;
mod store;
mod users;
mod util;

pub use store::{PgRecord, PgRecordStore};
pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};
use tracing::{error, warn};

use crate::application::repos::RepoError;
use crate::cache::InvalidationHooks;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
    hooks: Arc<InvalidationHooks>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool, hooks: InvalidationHooks) -> Self {
        Self {
            pool: Arc::new(pool),
            hooks: Arc::new(hooks),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn hooks(&self) -> &InvalidationHooks {
        &self.hooks
    }

    /// Read store for one record type, sharing this pool.
    pub fn store<R: PgRecord>(&self) -> PgRecordStore<R> {
        PgRecordStore::new(Arc::clone(&self.pool))
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}

/// Commit `tx` when `result` is `Ok`, otherwise roll it back and log.
///
/// Callers fire commit hooks only after this returns `Ok`.
pub(crate) async fn auto_commit<T>(
    tx: Transaction<'static, Postgres>,
    op: &'static str,
    result: Result<T, RepoError>,
) -> Result<T, RepoError> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(map_sqlx_error)?;
            Ok(value)
        }
        Err(err) => {
            warn!(
                target = "tavern::infra::db",
                op,
                error = %err,
                "write failed; rolling back"
            );
            if let Err(rollback) = tx.rollback().await {
                error!(
                    target = "tavern::infra::db",
                    op,
                    error = %rollback,
                    "rollback failed"
                );
            }
            Err(err)
        }
    }
}
