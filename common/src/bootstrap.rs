// Bootstrap utilities for the scheduler binary
//
// Each helper turns one settings section into a ready component and logs
// which backend was chosen.

use crate::config::{LockStorageBackend, RecordLogBackend, Settings};
use crate::db::{DbPool, RedisPool};
use crate::identity::{IdentityProvider, KeyedIdentity, SignedOut};
use crate::record_log::{InMemoryRecordLog, PostgresRecordLog, RecordLog};
use crate::storage::{MemoryStorage, RedisStorage, SharedStorage};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Initialize database pool, check it answers, and make sure the records table exists
///
/// # Errors
/// Returns error if the pool cannot connect, fails its health check, or the
/// schema cannot be applied
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;
    db_pool
        .health_check()
        .await
        .context("Database did not answer health check")?;
    db_pool
        .ensure_schema()
        .await
        .context("Failed to apply records schema")?;

    info!("Database pool initialized");
    Ok(db_pool)
}

/// Initialize Redis pool for shared lock state and confirm it answers PING
///
/// # Errors
/// Returns error if Redis is unreachable or does not answer
#[tracing::instrument(skip(settings))]
pub async fn init_redis_pool(settings: &Settings) -> Result<RedisPool> {
    info!("Initializing Redis pool");

    let redis_pool = RedisPool::new(&settings.redis)
        .await
        .context("Failed to initialize Redis pool")?;
    redis_pool
        .ping()
        .await
        .context("Redis did not answer PING")?;

    info!("Redis pool initialized");
    Ok(redis_pool)
}

/// Record log backend selected by `record_log.backend`
///
/// # Errors
/// Returns error if the Postgres backend is selected and unreachable
pub async fn init_record_log(settings: &Settings) -> Result<Arc<dyn RecordLog>> {
    match settings.record_log.backend {
        RecordLogBackend::Memory => {
            warn!("Using in-memory record log; records are lost on exit");
            Ok(Arc::new(InMemoryRecordLog::new()))
        }
        RecordLogBackend::Postgres => {
            let db_pool = init_database_pool(settings).await?;
            info!("Using Postgres record log");
            Ok(Arc::new(PostgresRecordLog::new(db_pool)))
        }
    }
}

/// Shared lock storage selected by `lock_storage.backend`
///
/// # Errors
/// Returns error if the Redis backend is selected and unreachable
pub async fn init_lock_storage(settings: &Settings) -> Result<Arc<dyn SharedStorage>> {
    match settings.lock_storage.backend {
        LockStorageBackend::Memory => {
            info!("Using in-process lock storage");
            Ok(Arc::new(MemoryStorage::new()))
        }
        LockStorageBackend::Redis => {
            let redis_pool = init_redis_pool(settings).await?;
            info!("Using Redis lock storage");
            Ok(Arc::new(RedisStorage::new(redis_pool)))
        }
    }
}

/// Identity from `identity.owner` and `identity.secret_key`, or signed out
///
/// # Errors
/// Returns error if the secret key is not valid hex or too short
pub fn init_identity(settings: &Settings) -> Result<Arc<dyn IdentityProvider>> {
    match (&settings.identity.owner, &settings.identity.secret_key) {
        (Some(owner), Some(secret_key)) => {
            let identity = KeyedIdentity::from_hex(owner.clone(), secret_key)
                .context("Invalid identity secret key")?;
            info!(owner = %owner, "Identity configured");
            Ok(Arc::new(identity))
        }
        _ => {
            warn!("No identity configured; scheduled posts will not be published");
            Ok(Arc::new(SignedOut))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backends_need_no_infrastructure() {
        let settings = Settings::default();
        assert!(init_record_log(&settings).await.is_ok());
        assert!(init_lock_storage(&settings).await.is_ok());
    }

    #[test]
    fn test_identity_selection() {
        let mut settings = Settings::default();
        assert!(init_identity(&settings).unwrap().owner().is_none());

        settings.identity.owner = Some("alice".to_string());
        settings.identity.secret_key = Some("00112233445566778899aabbccddeeff".to_string());
        assert_eq!(
            init_identity(&settings).unwrap().owner().as_deref(),
            Some("alice")
        );

        settings.identity.secret_key = Some("not-hex".to_string());
        assert!(init_identity(&settings).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backends_fail_at_startup() {
        let mut settings = Settings::default();
        settings.lock_storage.backend = LockStorageBackend::Redis;
        settings.redis.url = "not-a-redis-url".to_string();
        assert!(init_lock_storage(&settings).await.is_err());

        settings.record_log.backend = RecordLogBackend::Postgres;
        settings.database.url = "not-a-postgres-url".to_string();
        assert!(init_record_log(&settings).await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_redis_lock_storage_answers_ping() {
        let mut settings = Settings::default();
        settings.lock_storage.backend = LockStorageBackend::Redis;
        assert!(init_lock_storage(&settings).await.is_ok());
    }
}
