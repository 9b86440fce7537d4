use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder, Transaction};
use time::OffsetDateTime;

use crate::{
    application::repos::{CafesWriteRepo, CommitHooks, CreateCafeParams, RepoError},
    domain::{
        attributes::Attributes,
        entities::{CafeMemberRecord, CafeRecord},
    },
};

use super::{PgRecord, PostgresRepositories, auto_commit, map_sqlx_error};

const CAFE_COLUMNS: &str = "id, slug, name, user_id, status, style, created_at";
const MEMBER_COLUMNS: &str = "cafe_id, user_id, role, created_at";

#[derive(sqlx::FromRow)]
pub struct CafeRow {
    id: i64,
    slug: String,
    name: String,
    user_id: i64,
    status: i16,
    style: Value,
    created_at: OffsetDateTime,
}

impl TryFrom<CafeRow> for CafeRecord {
    type Error = RepoError;

    fn try_from(row: CafeRow) -> Result<Self, Self::Error> {
        let style = Attributes::coerce(row.style).map_err(|err| RepoError::Integrity {
            message: format!("cafe {} has malformed style: {err}", row.id),
        })?;
        Ok(CafeRecord::new(
            row.id,
            row.slug,
            row.name,
            row.user_id,
            row.status,
            style,
            row.created_at,
        ))
    }
}

impl PgRecord for CafeRecord {
    type Row = CafeRow;

    const SELECT: &'static str = CAFE_COLUMNS;

    fn from_row(row: CafeRow) -> Result<Self, RepoError> {
        row.try_into()
    }
}

#[derive(sqlx::FromRow)]
pub struct CafeMemberRow {
    cafe_id: i64,
    user_id: i64,
    role: i16,
    created_at: OffsetDateTime,
}

impl PgRecord for CafeMemberRecord {
    type Row = CafeMemberRow;

    const SELECT: &'static str = MEMBER_COLUMNS;

    fn from_row(row: CafeMemberRow) -> Result<Self, RepoError> {
        Ok(CafeMemberRecord {
            cafe_id: row.cafe_id,
            user_id: row.user_id,
            role: row.role,
            created_at: row.created_at,
        })
    }
}

fn style_value(style: &Attributes) -> Value {
    Value::Object(style.as_map().clone())
}

async fn insert_cafe(
    tx: &mut Transaction<'static, Postgres>,
    params: CreateCafeParams,
) -> Result<CafeRecord, RepoError> {
    let sql = format!(
        "INSERT INTO cafes (slug, name, user_id, status, style) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {CAFE_COLUMNS}"
    );
    let row = sqlx::query_as::<_, CafeRow>(&sql)
        .bind(params.slug)
        .bind(params.name)
        .bind(params.user_id)
        .bind(params.status)
        .bind(style_value(&params.style))
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    row.try_into()
}

/// Writes only the columns the cafe reports as modified.
async fn update_dirty_columns(
    tx: &mut Transaction<'static, Postgres>,
    cafe: &CafeRecord,
) -> Result<CafeRecord, RepoError> {
    let dirty = cafe.dirty_fields();
    let mut qb: QueryBuilder<'static, Postgres> = QueryBuilder::new("UPDATE cafes SET ");
    {
        let mut assignments = qb.separated(", ");
        if dirty.contains("name") {
            assignments.push("name = ");
            assignments.push_bind_unseparated(cafe.name.clone());
        }
        if dirty.contains("style") {
            assignments.push("style = ");
            assignments.push_bind_unseparated(style_value(&cafe.style));
        }
    }
    qb.push(" WHERE id = ");
    qb.push_bind(cafe.id);
    qb.push(" RETURNING ");
    qb.push(CAFE_COLUMNS);

    let row = qb
        .build_query_as::<CafeRow>()
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    row.try_into()
}

async fn delete_cafe_row(
    tx: &mut Transaction<'static, Postgres>,
    id: i64,
) -> Result<CafeRecord, RepoError> {
    let sql = format!("DELETE FROM cafes WHERE id = $1 RETURNING {CAFE_COLUMNS}");
    let row = sqlx::query_as::<_, CafeRow>(&sql)
        .bind(id)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    row.try_into()
}

#[async_trait]
impl CafesWriteRepo for PostgresRepositories {
    async fn create_cafe(&self, params: CreateCafeParams) -> Result<CafeRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let result = insert_cafe(&mut tx, params).await;
        let cafe = auto_commit(tx, "create_cafe", result).await?;
        CommitHooks::<CafeRecord>::after_insert(self.hooks(), &cafe).await;
        Ok(cafe)
    }

    async fn save_cafe(&self, cafe: &CafeRecord) -> Result<bool, RepoError> {
        let dirty = cafe.dirty_fields();
        if !dirty.contains("name") && !dirty.contains("style") {
            return Ok(false);
        }

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let result = update_dirty_columns(&mut tx, cafe).await;
        let saved = auto_commit(tx, "save_cafe", result).await?;
        dirty.take();
        CommitHooks::<CafeRecord>::after_update(self.hooks(), &saved).await;
        Ok(true)
    }

    async fn delete_cafe(&self, id: i64) -> Result<CafeRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let result = delete_cafe_row(&mut tx, id).await;
        let cafe = auto_commit(tx, "delete_cafe", result).await?;
        CommitHooks::<CafeRecord>::after_delete(self.hooks(), &cafe).await;
        Ok(cafe)
    }
}
