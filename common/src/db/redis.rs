// Redis connection for the shared lock and published-cache maps

use crate::config::RedisConfig;
use crate::errors::StorageError;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, info, instrument};

/// Reconnecting Redis handle shared by every `RedisStorage` clone
#[derive(Clone)]
pub struct RedisPool {
    manager: ConnectionManager,
}

impl RedisPool {
    /// Open the client and wait for the first connection
    ///
    /// # Errors
    /// Returns `StorageError::ConnectionFailed` for an unparsable URL or an
    /// unreachable server
    #[instrument(skip(config), fields(redis_url = %config.url))]
    pub async fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StorageError::ConnectionFailed(format!("Invalid Redis URL: {}", e)))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("Redis unreachable: {}", e)))?;

        info!("Connected to Redis lock storage");
        Ok(Self { manager })
    }

    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// `PING` the server; anything but `PONG` is an error
    pub async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::RedisError(format!("PING failed: {}", e)))?;

        match reply.as_str() {
            "PONG" => {
                debug!("Redis answered PING");
                Ok(())
            }
            other => Err(StorageError::RedisError(format!(
                "Unexpected PING reply: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unparsable_url_is_rejected() {
        let config = RedisConfig {
            url: "not-a-redis-url".to_string(),
        };
        assert!(matches!(
            RedisPool::new(&config).await,
            Err(StorageError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_ping_local_redis() {
        let pool = RedisPool::new(&RedisConfig::default()).await.unwrap();
        assert!(pool.ping().await.is_ok());
    }
}
