//! Generic Postgres reads keyed by a record descriptor.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{FromRow, Postgres, QueryBuilder};

use crate::application::repos::{RecordStore, RepoError, validate_filter};
use crate::domain::record::{FieldValue, Filter, Record, RecordId};

use super::map_sqlx_error;

/// A record type with a Postgres row representation.
pub trait PgRecord: Record {
    type Row: for<'r> FromRow<'r, PgRow> + Send + Unpin;

    /// Comma-separated select list matching [`Self::Row`].
    const SELECT: &'static str;

    fn from_row(row: Self::Row) -> Result<Self, RepoError>;
}

pub struct PgRecordStore<R> {
    pool: Arc<PgPool>,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for PgRecordStore<R> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            _record: PhantomData,
        }
    }
}

impl<R: PgRecord> PgRecordStore<R> {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            _record: PhantomData,
        }
    }

    fn select(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(R::SELECT);
        qb.push(" FROM ");
        qb.push(R::DESCRIPTOR.table);
        qb.push(" WHERE TRUE");
        qb
    }

    fn order_by_key(qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push(" ORDER BY ");
        qb.push(R::DESCRIPTOR.primary_key.join(", "));
    }

    async fn fetch_rows(
        &self,
        mut qb: QueryBuilder<'static, Postgres>,
    ) -> Result<Vec<R>, RepoError> {
        let rows = qb
            .build_query_as::<R::Row>()
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)?;
        rows.into_iter().map(R::from_row).collect()
    }
}

pub(crate) fn push_value(qb: &mut QueryBuilder<'static, Postgres>, value: &FieldValue) {
    match value {
        FieldValue::Int(value) => qb.push_bind(*value),
        FieldValue::Text(value) => qb.push_bind(value.clone()),
        FieldValue::Bool(value) => qb.push_bind(*value),
        FieldValue::Uuid(value) => qb.push_bind(*value),
    };
}

pub(crate) fn push_filter(qb: &mut QueryBuilder<'static, Postgres>, filter: &Filter) {
    for (column, value) in filter.iter() {
        qb.push(" AND ");
        qb.push(column);
        qb.push(" = ");
        push_value(qb, value);
    }
}

#[async_trait]
impl<R: PgRecord> RecordStore<R> for PgRecordStore<R> {
    async fn fetch(&self, id: &RecordId) -> Result<Option<R>, RepoError> {
        let key = R::DESCRIPTOR.primary_key;
        if id.len() != key.len() {
            return Err(RepoError::invalid_input(format!(
                "{} expects {} key values, got {}",
                R::DESCRIPTOR.table,
                key.len(),
                id.len()
            )));
        }

        let mut qb = self.select();
        for (column, value) in key.iter().zip(id.values()) {
            qb.push(" AND ");
            qb.push(*column);
            qb.push(" = ");
            push_value(&mut qb, value);
        }
        Ok(self.fetch_rows(qb).await?.into_iter().next())
    }

    async fn fetch_many(&self, ids: &[FieldValue]) -> Result<Vec<R>, RepoError> {
        let Some(column) = R::DESCRIPTOR.single_key() else {
            return Err(RepoError::invalid_input(format!(
                "{} has a composite primary key",
                R::DESCRIPTOR.table
            )));
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = self.select();
        qb.push(" AND ");
        qb.push(column);
        qb.push(" IN (");
        {
            let mut separated = qb.separated(", ");
            for value in ids {
                match value {
                    FieldValue::Int(value) => separated.push_bind(*value),
                    FieldValue::Text(value) => separated.push_bind(value.clone()),
                    FieldValue::Bool(value) => separated.push_bind(*value),
                    FieldValue::Uuid(value) => separated.push_bind(*value),
                };
            }
        }
        qb.push(")");
        self.fetch_rows(qb).await
    }

    async fn first_matching(&self, filter: &Filter) -> Result<Option<R>, RepoError> {
        validate_filter::<R>(filter)?;
        let mut qb = self.select();
        push_filter(&mut qb, filter);
        Self::order_by_key(&mut qb);
        qb.push(" LIMIT 1");
        Ok(self.fetch_rows(qb).await?.into_iter().next())
    }

    async fn count_matching(&self, filter: &Filter) -> Result<i64, RepoError> {
        validate_filter::<R>(filter)?;
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM ");
        qb.push(R::DESCRIPTOR.table);
        qb.push(" WHERE TRUE");
        push_filter(&mut qb, filter);
        qb.build_query_scalar::<i64>()
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)
    }
}
