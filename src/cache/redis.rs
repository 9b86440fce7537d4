//! Redis-backed cache shared across workers.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ErrorKind, RedisError};
use tracing::info;

use super::backend::{BackendError, CacheBackend};

/// Thin adapter over a multiplexed, auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url).map_err(BackendError::unavailable)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(BackendError::unavailable)?;
        info!(target: "tavern::cache::redis", "Connected to redis");
        Ok(Self { manager })
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn map_err(err: RedisError) -> BackendError {
    BackendError::unavailable(err)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await.map_err(map_err)?;
        Ok(value)
    }

    async fn get_many(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, Option<String>>, BackendError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.manager.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(keys.iter().cloned().zip(values).collect())
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), BackendError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(key, value, ttl_seconds(ttl))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn set_many(
        &self,
        entries: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        if entries.is_empty() {
            return Ok(());
        }
        let seconds = ttl_seconds(ttl);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.set_ex(key, value, seconds).ignore();
        }
        let mut conn = self.manager.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(map_err)?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), BackendError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let _: () = conn.del(keys).await.map_err(map_err)?;
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, BackendError> {
        let mut conn = self.manager.clone();
        let next: i64 = conn.incr(key, 1_i64).await.map_err(|err| {
            if err.kind() == ErrorKind::ResponseError {
                BackendError::NotAnInteger {
                    key: key.to_string(),
                }
            } else {
                map_err(err)
            }
        })?;
        if next == 1 {
            let seconds = i64::try_from(ttl_seconds(ttl)).unwrap_or(i64::MAX);
            let _: () = conn.expire(key, seconds).await.map_err(map_err)?;
        }
        Ok(next)
    }
}
