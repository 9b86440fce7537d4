//! Cafe lookups, owner joins and style edits.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::application::error::AppError;
use crate::application::repos::{CafesWriteRepo, CreateCafeParams};
use crate::cache::{CacheQuery, ResponseFormat};
use crate::domain::entities::{CafeMemberRecord, CafeRecord, UserRecord};
use crate::domain::record::Filter;
use crate::domain::rules::{validate_slug, validate_style_key};

/// A cafe with its owner attached, `None` when the owner row is gone.
#[derive(Debug, Clone, Serialize)]
pub struct CafeWithOwner {
    #[serde(flatten)]
    pub cafe: CafeRecord,
    pub owner: Option<UserRecord>,
}

#[derive(Clone)]
pub struct CafeService {
    cafes: CacheQuery<CafeRecord>,
    users: CacheQuery<UserRecord>,
    members: CacheQuery<CafeMemberRecord>,
    writer: Arc<dyn CafesWriteRepo>,
}

impl CafeService {
    pub fn new(
        cafes: CacheQuery<CafeRecord>,
        users: CacheQuery<UserRecord>,
        members: CacheQuery<CafeMemberRecord>,
        writer: Arc<dyn CafesWriteRepo>,
    ) -> Self {
        Self {
            cafes,
            users,
            members,
            writer,
        }
    }

    pub async fn by_slug(&self, slug: &str, format: ResponseFormat) -> Result<CafeRecord, AppError> {
        let filter = Filter::new().eq("slug", slug);
        Ok(self.cafes.first_or_404(&filter, format).await?)
    }

    /// Cafes in request order, each with its owner. Unknown ids are skipped.
    pub async fn with_owners(&self, ids: &[i64]) -> Result<Vec<CafeWithOwner>, AppError> {
        let cafes = self.cafes.get_many(ids.iter().copied()).await?;
        let owner_ids: Vec<i64> = cafes.iter().map(|cafe| cafe.user_id).collect();
        let owners = self.users.get_dict(owner_ids).await?;
        debug!(cafes = cafes.len(), owners = owners.len(), "joined cafe owners");

        Ok(cafes
            .into_iter()
            .map(|cafe| {
                let owner = owners.get(&cafe.user_id.to_string()).cloned().flatten();
                CafeWithOwner { cafe, owner }
            })
            .collect())
    }

    pub async fn create(&self, params: CreateCafeParams) -> Result<CafeRecord, AppError> {
        validate_slug(&params.slug)?;
        Ok(self.writer.create_cafe(params).await?)
    }

    pub async fn set_style(
        &self,
        id: i64,
        key: &str,
        value: Value,
        format: ResponseFormat,
    ) -> Result<CafeRecord, AppError> {
        validate_style_key(key)?;
        let mut cafe = self.cafes.get_or_404(id, format).await?;
        cafe.style.insert(key, value);
        self.writer.save_cafe(&cafe).await?;
        Ok(cafe)
    }

    /// Remove one style key. Removing an absent key writes nothing.
    pub async fn remove_style(
        &self,
        id: i64,
        key: &str,
        format: ResponseFormat,
    ) -> Result<CafeRecord, AppError> {
        validate_style_key(key)?;
        let mut cafe = self.cafes.get_or_404(id, format).await?;
        cafe.style.remove(key);
        self.writer.save_cafe(&cafe).await?;
        Ok(cafe)
    }

    pub async fn delete(&self, id: i64) -> Result<CafeRecord, AppError> {
        Ok(self.writer.delete_cafe(id).await?)
    }

    pub async fn member(
        &self,
        cafe_id: i64,
        user_id: i64,
        format: ResponseFormat,
    ) -> Result<CafeMemberRecord, AppError> {
        Ok(self.members.get_or_404((cafe_id, user_id), format).await?)
    }
}
