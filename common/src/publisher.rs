// Idempotent publish workflow for a single scheduled post
//
// Order: published-cache check, lock, fresh re-read, lock re-check, decrypt,
// compose, publish content, publish status revision, record in cache. The
// lock is released on every exit after it was taken.

use crate::codec;
use crate::errors::{LogError, PublishError};
use crate::identity::IdentityProvider;
use crate::lock::PublishLockManager;
use crate::models::{DraftPayload, PostStatus, RecordDraft, ScheduledPost};
use crate::record_log::RecordLog;
use crate::record_store::RecordStore;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Ids produced by a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub content_id: String,
    pub status_record_id: String,
}

/// Build the outgoing content from a decrypted draft
///
/// Media urls are appended to the body after a blank line and each item gets
/// an `imeta` tag carrying its url, alt text and provenance pairs.
pub fn compose(post_kind: u32, payload: &DraftPayload) -> RecordDraft {
    let mut content = payload.content.clone();
    let mut tags = payload.tags.clone();

    let images = payload.images.as_deref().unwrap_or_default();
    if !images.is_empty() {
        let missing: Vec<&str> = images
            .iter()
            .map(|image| image.url.as_str())
            .filter(|url| !content.contains(url))
            .collect();
        if !missing.is_empty() {
            let urls = missing.join("\n");
            content = if content.trim().is_empty() {
                urls
            } else {
                format!("{}\n\n{}", content.trim_end(), urls)
            };
        }

        for image in images {
            let mut imeta = vec!["imeta".to_string(), format!("url {}", image.url)];
            if let Some(alt) = image.alt.as_ref().filter(|alt| !alt.is_empty()) {
                imeta.push(format!("alt {}", alt));
            }
            for pair in &image.tags {
                if let [key, value, ..] = pair.as_slice() {
                    imeta.push(format!("{} {}", key, value));
                }
            }
            tags.push(imeta);
        }
    }

    RecordDraft {
        kind: post_kind,
        tags,
        content,
    }
}

/// Runs the publish procedure for due posts of the signed-in owner
pub struct PublishWorkflow {
    locks: Arc<PublishLockManager>,
    store: Arc<RecordStore>,
    log: Arc<dyn RecordLog>,
    identity: Arc<dyn IdentityProvider>,
}

impl PublishWorkflow {
    pub fn new(
        locks: Arc<PublishLockManager>,
        store: Arc<RecordStore>,
        log: Arc<dyn RecordLog>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            locks,
            store,
            log,
            identity,
        }
    }

    #[instrument(skip(self, post), fields(post_id = %post.id, session = %self.locks.session()))]
    pub async fn publish(&self, post: &ScheduledPost) -> Result<Published, PublishError> {
        if self.identity.owner().as_deref() != Some(post.owner.as_str()) {
            return Err(PublishError::AuthenticationRequired);
        }

        if let Some(content_id) = self.locks.is_already_published(&post.id, &post.owner).await {
            debug!(content_id = %content_id, "Post found in published cache");
            return Err(PublishError::AlreadyPublished {
                content_id: Some(content_id),
            });
        }

        if !self.locks.acquire_lock(&post.id, &post.owner).await {
            return Err(PublishError::LockHeld);
        }

        let result = self.publish_locked(post).await;
        self.locks.release_lock(&post.id, &post.owner).await;
        result
    }

    async fn publish_locked(&self, post: &ScheduledPost) -> Result<Published, PublishError> {
        let latest = self.freshest(post).await;
        if latest.status != PostStatus::Scheduled || latest.published_event_id.is_some() {
            if let Some(content_id) = &latest.published_event_id {
                self.locks
                    .mark_as_published(&post.id, content_id, &post.owner)
                    .await;
            }
            debug!(status = %latest.status, "Post no longer scheduled in latest revision");
            return Err(PublishError::AlreadyPublished {
                content_id: latest.published_event_id.clone(),
            });
        }

        if !self.locks.owns_lock(&post.id, &post.owner).await {
            return Err(PublishError::LockLost);
        }

        let plaintext = self
            .identity
            .decrypt(&latest.owner, &latest.encrypted_payload)
            .await
            .map_err(|e| PublishError::DecryptionFailed(e.to_string()))?;
        let payload: DraftPayload = serde_json::from_str(&plaintext)
            .map_err(|e| PublishError::DecryptionFailed(format!("Malformed draft: {}", e)))?;

        let content = compose(latest.post_kind, &payload);
        let content_id = match self.log.publish(&latest.owner, content).await {
            Ok(record) => record.id,
            Err(LogError::Duplicate { id }) => {
                self.locks.mark_as_published(&post.id, &id, &post.owner).await;
                return Err(PublishError::AlreadyPublished {
                    content_id: Some(id),
                });
            }
            Err(e) => return Err(PublishError::PublishFailed(e.to_string())),
        };
        info!(content_id = %content_id, "Primary content published");

        let mut published = latest.clone();
        published.status = PostStatus::Published;
        published.published_event_id = Some(content_id.clone());

        // Content is live: cache it whatever the status revision outcome
        let status_record = self.log.publish(&latest.owner, codec::revision(&published)).await;
        self.locks
            .mark_as_published(&post.id, &content_id, &post.owner)
            .await;

        match status_record {
            Ok(record) => {
                self.store.observe(&record);
                Ok(Published {
                    content_id,
                    status_record_id: record.id,
                })
            }
            Err(LogError::Duplicate { .. }) => Err(PublishError::AlreadyPublished {
                content_id: Some(content_id),
            }),
            Err(e) => {
                warn!(content_id = %content_id, error = %e, "Status revision failed after content went live");
                Err(PublishError::StatusUpdatePublishFailed {
                    content_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Publish the missing `published` revision for content that is already live
    ///
    /// Returns the id of the repair revision, or `None` when the cache has no
    /// entry or the latest revision no longer awaits publishing.
    #[instrument(skip(self, post), fields(post_id = %post.id, session = %self.locks.session()))]
    pub async fn reconcile(&self, post: &ScheduledPost) -> Result<Option<String>, PublishError> {
        let Some(content_id) = self.locks.is_already_published(&post.id, &post.owner).await else {
            return Ok(None);
        };

        if !self.locks.acquire_lock(&post.id, &post.owner).await {
            return Err(PublishError::LockHeld);
        }

        let result = self.reconcile_locked(post, content_id).await;
        self.locks.release_lock(&post.id, &post.owner).await;
        result
    }

    async fn reconcile_locked(
        &self,
        post: &ScheduledPost,
        content_id: String,
    ) -> Result<Option<String>, PublishError> {
        let latest = self.freshest(post).await;
        if !latest.is_awaiting_publish() {
            return Ok(None);
        }

        let mut published = latest.clone();
        published.status = PostStatus::Published;
        published.published_event_id = Some(content_id.clone());

        match self.log.publish(&latest.owner, codec::revision(&published)).await {
            Ok(record) => {
                info!(content_id = %content_id, record_id = %record.id, "Missing published revision repaired");
                self.store.observe(&record);
                Ok(Some(record.id))
            }
            Err(LogError::Duplicate { .. }) => Ok(None),
            Err(e) => Err(PublishError::StatusUpdatePublishFailed {
                content_id,
                reason: e.to_string(),
            }),
        }
    }

    async fn freshest(&self, post: &ScheduledPost) -> ScheduledPost {
        match self.store.fetch_latest(post).await {
            Ok(Some(latest)) => latest,
            Ok(None) => self.store.cached(&post.id).unwrap_or_else(|| post.clone()),
            Err(e) => {
                warn!(error = %e, "Fresh read failed, using cached revision");
                self.store.cached(&post.id).unwrap_or_else(|| post.clone())
            }
        }
    }
}
