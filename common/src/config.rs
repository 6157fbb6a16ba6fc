// Configuration management with layered configuration (file, env)

use crate::lock::LockManagerConfig;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub record_log: RecordLogConfig,
    pub lock_storage: LockStorageConfig,
    pub identity: IdentityConfig,
    pub scheduler: SchedulerConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordLogBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordLogConfig {
    pub backend: RecordLogBackend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStorageBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockStorageConfig {
    pub backend: LockStorageBackend,
    /// Prefix of the keys holding lock and published-cache state
    pub key_prefix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Owner identity whose posts this process publishes
    pub owner: Option<String>,
    /// Hex encoded secret used to decrypt drafts
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_seconds: u64,
    pub lock_timeout_seconds: u64,
    pub grace_window_seconds: u64,
    pub refresh_delay_seconds: u64,
    pub published_cache_capacity: usize,
    pub published_cache_retention_seconds: u64,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_window_seconds)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_secs(self.refresh_delay_seconds)
    }

    pub fn published_cache_retention(&self) -> Duration {
        Duration::from_secs(self.published_cache_retention_seconds)
    }
}

impl SchedulerConfig {
    /// Lock manager settings sharing this scheduler's timeouts
    pub fn lock_manager(&self, key_prefix: &str) -> LockManagerConfig {
        LockManagerConfig {
            key_prefix: key_prefix.to_string(),
            lock_timeout: self.lock_timeout(),
            cache_capacity: self.published_cache_capacity,
            cache_retention: self.published_cache_retention(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 45,
            lock_timeout_seconds: 300,
            grace_window_seconds: 300,
            refresh_delay_seconds: 2,
            published_cache_capacity: 1000,
            published_cache_retention_seconds: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: Option<u16>,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if matches!(self.record_log.backend, RecordLogBackend::Postgres) {
            if self.database.url.is_empty() {
                return Err("Database URL cannot be empty".to_string());
            }
            if self.database.max_connections == 0 {
                return Err("Database max_connections must be greater than 0".to_string());
            }
        }

        if matches!(self.lock_storage.backend, LockStorageBackend::Redis) && self.redis.url.is_empty()
        {
            return Err("Redis URL cannot be empty".to_string());
        }
        if self.lock_storage.key_prefix.is_empty() {
            return Err("Lock storage key_prefix cannot be empty".to_string());
        }

        if self.identity.owner.is_some() != self.identity.secret_key.is_some() {
            return Err("Identity owner and secret_key must be configured together".to_string());
        }

        let scheduler = &self.scheduler;
        if scheduler.poll_interval_seconds == 0 {
            return Err("Scheduler poll_interval_seconds must be greater than 0".to_string());
        }
        if scheduler.lock_timeout_seconds == 0 {
            return Err("Scheduler lock_timeout_seconds must be greater than 0".to_string());
        }
        if scheduler.grace_window_seconds == 0 {
            return Err("Scheduler grace_window_seconds must be greater than 0".to_string());
        }
        if scheduler.published_cache_capacity == 0 {
            return Err("Scheduler published_cache_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            record_log: RecordLogConfig::default(),
            lock_storage: LockStorageConfig::default(),
            identity: IdentityConfig::default(),
            scheduler: SchedulerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/postwell".to_string(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_seconds: 30,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

impl Default for RecordLogConfig {
    fn default() -> Self {
        Self {
            backend: RecordLogBackend::Memory,
        }
    }
}

impl Default for LockStorageConfig {
    fn default() -> Self {
        Self {
            backend: LockStorageBackend::Memory,
            key_prefix: "scheduled_posts".to_string(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
            tracing_endpoint: None,
        }
    }
}
