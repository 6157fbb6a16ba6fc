// Advisory publish locks and the published-post cache
//
// State lives in shared storage that only supports read-modify-write, so two
// sessions can still interleave. The publish workflow layers a freshness
// re-read and a lock re-check on top of this.

use crate::clock::{Clock, SystemClock};
use crate::storage::SharedStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
pub const DEFAULT_CACHE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockEntry {
    session: String,
    /// Unix milliseconds
    acquired_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PublishedEntry {
    content_id: String,
    /// Unix milliseconds
    recorded_at: i64,
}

/// A published-cache hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedContent {
    pub content_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Tunables for [`PublishLockManager`]
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    pub key_prefix: String,
    pub lock_timeout: Duration,
    pub cache_capacity: usize,
    pub cache_retention: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            key_prefix: "scheduled_posts".to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_retention: DEFAULT_CACHE_RETENTION,
        }
    }
}

/// Per-session lock manager and published cache
///
/// One instance per execution context. Every operation is best-effort:
/// storage failures read as "no lock held" or "cache miss".
pub struct PublishLockManager {
    session: String,
    storage: Arc<dyn SharedStorage>,
    clock: Arc<dyn Clock>,
    config: LockManagerConfig,
}

fn entry_key(post_id: &str, owner: &str) -> String {
    format!("{}|{}", post_id, owner)
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl PublishLockManager {
    pub fn new(storage: Arc<dyn SharedStorage>, config: LockManagerConfig) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        storage: Arc<dyn SharedStorage>,
        clock: Arc<dyn Clock>,
        config: LockManagerConfig,
    ) -> Self {
        let session = Uuid::new_v4().to_string();
        info!(session = %session, "Publish lock manager started");
        Self {
            session,
            storage,
            clock,
            config,
        }
    }

    /// Random token identifying this execution context
    pub fn session(&self) -> &str {
        &self.session
    }

    fn locks_key(&self) -> String {
        format!("{}:locks", self.config.key_prefix)
    }

    fn published_key(&self) -> String {
        format!("{}:published", self.config.key_prefix)
    }

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn is_expired(&self, entry: &LockEntry, now: i64) -> bool {
        now - entry.acquired_at > millis(self.config.lock_timeout)
    }

    async fn read_map<T>(&self, key: &str) -> Option<HashMap<String, T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        match self.storage.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(map) => Some(map),
                Err(e) => {
                    warn!(key, error = %e, "Discarding undecodable lock state");
                    Some(HashMap::new())
                }
            },
            Ok(None) => Some(HashMap::new()),
            Err(e) => {
                warn!(key, error = %e, "Failed to read lock state");
                None
            }
        }
    }

    async fn write_map<T: Serialize>(&self, key: &str, map: &HashMap<String, T>) -> bool {
        let result = if map.is_empty() {
            self.storage.remove(key).await
        } else {
            match serde_json::to_string(map) {
                Ok(raw) => self.storage.set(key, &raw).await,
                Err(e) => Err(e.into()),
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "Failed to write lock state");
                false
            }
        }
    }

    /// Content id recorded for this post, if any
    pub async fn is_already_published(&self, post_id: &str, owner: &str) -> Option<String> {
        self.published_entry(post_id, owner)
            .await
            .map(|entry| entry.content_id)
    }

    /// Cache entry for this post including when it was recorded
    #[instrument(skip(self))]
    pub async fn published_entry(&self, post_id: &str, owner: &str) -> Option<PublishedContent> {
        let published = self
            .read_map::<PublishedEntry>(&self.published_key())
            .await?;
        let entry = published.get(&entry_key(post_id, owner))?;
        Some(PublishedContent {
            content_id: entry.content_id.clone(),
            recorded_at: DateTime::from_timestamp_millis(entry.recorded_at)?,
        })
    }

    /// Record published content, evicting the oldest entries past capacity
    #[instrument(skip(self))]
    pub async fn mark_as_published(&self, post_id: &str, content_id: &str, owner: &str) {
        let key = self.published_key();
        let Some(mut published) = self.read_map::<PublishedEntry>(&key).await else {
            return;
        };

        published.insert(
            entry_key(post_id, owner),
            PublishedEntry {
                content_id: content_id.to_string(),
                recorded_at: self.now_millis(),
            },
        );

        if published.len() > self.config.cache_capacity {
            let mut by_age: Vec<(String, i64)> = published
                .iter()
                .map(|(k, v)| (k.clone(), v.recorded_at))
                .collect();
            by_age.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let excess = published.len() - self.config.cache_capacity;
            for (evicted, _) in by_age.into_iter().take(excess) {
                published.remove(&evicted);
            }
            debug!(evicted = excess, "Evicted oldest published-cache entries");
        }

        self.write_map(&key, &published).await;
    }

    /// Try to take the publish lock for a post; reentrant for this session
    #[instrument(skip(self), fields(session = %self.session))]
    pub async fn acquire_lock(&self, post_id: &str, owner: &str) -> bool {
        let key = self.locks_key();
        let Some(mut locks) = self.read_map::<LockEntry>(&key).await else {
            return false;
        };

        let now = self.now_millis();
        locks.retain(|_, entry| !self.is_expired(entry, now));

        let lock_key = entry_key(post_id, owner);
        if let Some(existing) = locks.get(&lock_key) {
            if existing.session != self.session {
                debug!(holder = %existing.session, "Publish lock held by another session");
                return false;
            }
        }

        locks.insert(
            lock_key,
            LockEntry {
                session: self.session.clone(),
                acquired_at: now,
            },
        );

        if !self.write_map(&key, &locks).await {
            return false;
        }

        debug!("Publish lock acquired");
        true
    }

    /// Drop this session's lock for the post; other sessions' locks are untouched
    #[instrument(skip(self), fields(session = %self.session))]
    pub async fn release_lock(&self, post_id: &str, owner: &str) {
        let key = self.locks_key();
        let Some(mut locks) = self.read_map::<LockEntry>(&key).await else {
            return;
        };

        let lock_key = entry_key(post_id, owner);
        let ours = locks
            .get(&lock_key)
            .map(|entry| entry.session == self.session)
            .unwrap_or(false);
        if !ours {
            return;
        }

        locks.remove(&lock_key);
        if self.write_map(&key, &locks).await {
            debug!("Publish lock released");
        }
    }

    /// True only while this session holds a live lock; expired locks are released
    #[instrument(skip(self), fields(session = %self.session))]
    pub async fn owns_lock(&self, post_id: &str, owner: &str) -> bool {
        let key = self.locks_key();
        let Some(locks) = self.read_map::<LockEntry>(&key).await else {
            return false;
        };

        let Some(entry) = locks.get(&entry_key(post_id, owner)) else {
            return false;
        };
        if entry.session != self.session {
            return false;
        }

        if self.is_expired(entry, self.now_millis()) {
            warn!("Publish lock expired while held");
            self.release_lock(post_id, owner).await;
            return false;
        }

        true
    }

    /// Drop expired locks and published entries past retention
    #[instrument(skip(self))]
    pub async fn cleanup(&self) {
        let now = self.now_millis();

        let locks_key = self.locks_key();
        if let Some(mut locks) = self.read_map::<LockEntry>(&locks_key).await {
            let before = locks.len();
            locks.retain(|_, entry| !self.is_expired(entry, now));
            if locks.len() != before {
                self.write_map(&locks_key, &locks).await;
                debug!(removed = before - locks.len(), "Expired publish locks removed");
            }
        }

        let published_key = self.published_key();
        if let Some(mut published) = self.read_map::<PublishedEntry>(&published_key).await {
            let before = published.len();
            let retention = millis(self.config.cache_retention);
            published.retain(|_, entry| now - entry.recorded_at <= retention);
            if published.len() != before {
                self.write_map(&published_key, &published).await;
                debug!(
                    removed = before - published.len(),
                    "Stale published-cache entries removed"
                );
            }
        }
    }
}
