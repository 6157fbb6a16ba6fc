// Terminal status revisions for scheduled posts

use crate::codec;
use crate::errors::StatusUpdateError;
use crate::models::{PostStatus, Record, ScheduledPost};
use crate::record_log::RecordLog;
use std::sync::Arc;
use tracing::{info, instrument};

/// Publishes `failed` / `cancelled` revisions without touching the payload
pub struct StatusUpdater {
    log: Arc<dyn RecordLog>,
}

impl StatusUpdater {
    pub fn new(log: Arc<dyn RecordLog>) -> Self {
        Self { log }
    }

    /// Publish a revision with `status`, keeping every other tag and the payload
    #[instrument(skip(self, post), fields(post_id = %post.id, from = %post.status))]
    pub async fn update_status(
        &self,
        post: &ScheduledPost,
        status: PostStatus,
    ) -> Result<Record, StatusUpdateError> {
        if !matches!(status, PostStatus::Failed | PostStatus::Cancelled)
            || !post.status.can_transition_to(status)
        {
            return Err(StatusUpdateError::InvalidTransition {
                from: post.status,
                to: status,
            });
        }

        let mut next = post.clone();
        next.status = status;
        let record = self.log.publish(&post.owner, codec::revision(&next)).await?;

        info!(record_id = %record.id, to = %status, "Scheduled post status updated");
        Ok(record)
    }

    pub async fn mark_failed(&self, post: &ScheduledPost) -> Result<Record, StatusUpdateError> {
        self.update_status(post, PostStatus::Failed).await
    }

    /// Manual cancellation of a post that has not been published
    pub async fn cancel(&self, post: &ScheduledPost) -> Result<Record, StatusUpdateError> {
        self.update_status(post, PostStatus::Cancelled).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{RecordDraft, SCHEDULED_POST_KIND};
    use crate::record_log::InMemoryRecordLog;
    use chrono::Utc;

    async fn scheduled_post(log: &InMemoryRecordLog) -> ScheduledPost {
        let record = log
            .publish(
                "alice",
                RecordDraft {
                    kind: SCHEDULED_POST_KIND,
                    tags: vec![
                        vec!["d".into(), "slug".into()],
                        vec!["scheduled_at".into(), "1700000000".into()],
                        vec!["post_kind".into(), "1".into()],
                        vec!["title".into(), "Launch".into()],
                        vec!["published_event_id".into(), "".into()],
                    ],
                    content: "sealed-draft".into(),
                },
            )
            .await
            .unwrap();
        codec::decode(&record).unwrap()
    }

    #[tokio::test]
    async fn test_mark_failed_preserves_everything_else() {
        let log = Arc::new(InMemoryRecordLog::with_clock(Arc::new(ManualClock::new(
            Utc::now(),
        ))));
        let updater = StatusUpdater::new(log.clone());
        let post = scheduled_post(&log).await;

        let record = updater.mark_failed(&post).await.unwrap();
        assert_eq!(record.content, "sealed-draft");

        let failed = codec::decode(&record).unwrap();
        assert_eq!(failed.status, PostStatus::Failed);
        assert_eq!(failed.id, post.id);
        assert_eq!(failed.scheduled_at, post.scheduled_at);
        assert_eq!(failed.title.as_deref(), Some("Launch"));

        // Republishing the same terminal status is harmless
        assert!(updater.mark_failed(&failed).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_scheduled_post() {
        let log = Arc::new(InMemoryRecordLog::new());
        let updater = StatusUpdater::new(log.clone());
        let post = scheduled_post(&log).await;

        let record = updater.cancel(&post).await.unwrap();
        assert_eq!(codec::decode(&record).unwrap().status, PostStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_terminal_posts_are_not_revised() {
        let log = Arc::new(InMemoryRecordLog::new());
        let updater = StatusUpdater::new(log.clone());
        let mut post = scheduled_post(&log).await;

        post.status = PostStatus::Published;
        assert!(matches!(
            updater.mark_failed(&post).await,
            Err(StatusUpdateError::InvalidTransition { .. })
        ));

        post.status = PostStatus::Cancelled;
        assert!(updater.cancel(&post).await.is_err());

        post.status = PostStatus::Scheduled;
        assert!(updater
            .update_status(&post, PostStatus::Published)
            .await
            .is_err());
    }
}
