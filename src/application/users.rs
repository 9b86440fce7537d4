//! User lookups and writes.

use std::sync::Arc;

use tracing::info;

use crate::application::error::AppError;
use crate::application::repos::{CreateUserParams, UpdateUserParams, UsersWriteRepo};
use crate::cache::{CacheQuery, ResponseFormat};
use crate::domain::entities::UserRecord;
use crate::domain::record::Filter;
use crate::domain::rules::{validate_email, validate_username};

#[derive(Clone)]
pub struct UserService {
    query: CacheQuery<UserRecord>,
    writer: Arc<dyn UsersWriteRepo>,
}

impl UserService {
    pub fn new(query: CacheQuery<UserRecord>, writer: Arc<dyn UsersWriteRepo>) -> Self {
        Self { query, writer }
    }

    pub async fn profile(
        &self,
        username: &str,
        format: ResponseFormat,
    ) -> Result<UserRecord, AppError> {
        let filter = Filter::new().eq("username", username);
        Ok(self.query.first_or_404(&filter, format).await?)
    }

    pub async fn by_id(&self, id: i64, format: ResponseFormat) -> Result<UserRecord, AppError> {
        Ok(self.query.get_or_404(id, format).await?)
    }

    pub async fn count(&self) -> Result<i64, AppError> {
        Ok(self.query.count().await?)
    }

    pub async fn create(&self, params: CreateUserParams) -> Result<UserRecord, AppError> {
        validate_username(&params.username)?;
        validate_email(&params.email)?;
        let user = self.writer.create_user(params).await?;
        info!(user_id = user.id, username = %user.username, "user created");
        Ok(user)
    }

    pub async fn update(&self, params: UpdateUserParams) -> Result<UserRecord, AppError> {
        validate_email(&params.email)?;
        Ok(self.writer.update_user(params).await?)
    }

    pub async fn delete(&self, id: i64) -> Result<UserRecord, AppError> {
        let user = self.writer.delete_user(id).await?;
        info!(user_id = user.id, "user deleted");
        Ok(user)
    }
}
