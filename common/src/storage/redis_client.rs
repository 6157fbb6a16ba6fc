// Redis-backed shared storage for multiple scheduler processes of one owner
// Uses plain GET/SET/DEL so semantics match every other backend.

use super::SharedStorage;
use crate::db::RedisPool;
use crate::errors::StorageError;
use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::instrument;

/// Shared storage on top of a Redis connection manager
#[derive(Clone)]
pub struct RedisStorage {
    pool: RedisPool,
}

impl RedisStorage {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SharedStorage for RedisStorage {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.pool.connection();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| StorageError::RedisError(format!("Failed to read {}: {}", key, e)))?;
        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut conn = self.pool.connection();
        let _: () = conn
            .set(key, value)
            .await
            .map_err(|e| StorageError::RedisError(format!("Failed to write {}: {}", key, e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.pool.connection();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| StorageError::RedisError(format!("Failed to delete {}: {}", key, e)))?;
        Ok(())
    }
}
