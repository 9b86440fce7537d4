use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;

use crate::{
    application::repos::{
        CommitHooks, CreateUserParams, RepoError, UpdateUserParams, UsersWriteRepo,
    },
    domain::entities::UserRecord,
};

use super::{PgRecord, PostgresRepositories, auto_commit, map_sqlx_error};

const USER_COLUMNS: &str = "id, username, email, description, role, reputation, created_at";

#[derive(sqlx::FromRow)]
pub struct UserRow {
    id: i64,
    username: String,
    email: String,
    description: Option<String>,
    role: i16,
    reputation: i32,
    created_at: OffsetDateTime,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            description: row.description,
            role: row.role,
            reputation: row.reputation,
            created_at: row.created_at,
        }
    }
}

impl PgRecord for UserRecord {
    type Row = UserRow;

    const SELECT: &'static str = USER_COLUMNS;

    fn from_row(row: UserRow) -> Result<Self, RepoError> {
        Ok(row.into())
    }
}

async fn insert_user(
    tx: &mut Transaction<'static, Postgres>,
    params: CreateUserParams,
) -> Result<UserRecord, RepoError> {
    let sql = format!(
        "INSERT INTO users (username, email, description) VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
    );
    sqlx::query_as::<_, UserRow>(&sql)
        .bind(params.username)
        .bind(params.email)
        .bind(params.description)
        .fetch_one(&mut **tx)
        .await
        .map(UserRecord::from)
        .map_err(map_sqlx_error)
}

async fn update_user_row(
    tx: &mut Transaction<'static, Postgres>,
    params: UpdateUserParams,
) -> Result<UserRecord, RepoError> {
    let sql = format!(
        "UPDATE users SET email = $2, description = $3 WHERE id = $1 RETURNING {USER_COLUMNS}"
    );
    sqlx::query_as::<_, UserRow>(&sql)
        .bind(params.id)
        .bind(params.email)
        .bind(params.description)
        .fetch_one(&mut **tx)
        .await
        .map(UserRecord::from)
        .map_err(map_sqlx_error)
}

async fn delete_user_row(
    tx: &mut Transaction<'static, Postgres>,
    id: i64,
) -> Result<UserRecord, RepoError> {
    let sql = format!("DELETE FROM users WHERE id = $1 RETURNING {USER_COLUMNS}");
    sqlx::query_as::<_, UserRow>(&sql)
        .bind(id)
        .fetch_one(&mut **tx)
        .await
        .map(UserRecord::from)
        .map_err(map_sqlx_error)
}

#[async_trait]
impl UsersWriteRepo for PostgresRepositories {
    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let result = insert_user(&mut tx, params).await;
        let user = auto_commit(tx, "create_user", result).await?;
        CommitHooks::<UserRecord>::after_insert(self.hooks(), &user).await;
        Ok(user)
    }

    async fn update_user(&self, params: UpdateUserParams) -> Result<UserRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let result = update_user_row(&mut tx, params).await;
        let user = auto_commit(tx, "update_user", result).await?;
        CommitHooks::<UserRecord>::after_update(self.hooks(), &user).await;
        Ok(user)
    }

    async fn delete_user(&self, id: i64) -> Result<UserRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let result = delete_user_row(&mut tx, id).await;
        let user = auto_commit(tx, "delete_user", result).await?;
        CommitHooks::<UserRecord>::after_delete(self.hooks(), &user).await;
        Ok(user)
    }
}
