// Shared key/value storage used for lock and published-cache state
//
// Backends offer plain get/set/remove only. There is no test-and-set, so
// callers must treat every read-modify-write as racy.

pub mod memory;
pub mod redis_client;

pub use memory::MemoryStorage;
pub use redis_client::RedisStorage;

use crate::errors::StorageError;
use async_trait::async_trait;

/// Storage shared by every execution context of the same owner
#[async_trait]
pub trait SharedStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}
