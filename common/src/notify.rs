// User-facing failure reporting

use crate::errors::PublishError;
use crate::models::ScheduledPost;
use async_trait::async_trait;

/// Receives failures the user needs to hear about
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    /// A post was marked failed by the scheduler
    async fn post_failed(&self, post: &ScheduledPost, error: &PublishError);

    /// Scheduled posts cannot be published until someone signs in
    async fn authentication_required(&self);
}

/// Notifier that reports through the error log
pub struct LogNotifier;

#[async_trait]
impl FailureNotifier for LogNotifier {
    async fn post_failed(&self, post: &ScheduledPost, error: &PublishError) {
        tracing::error!(
            post_id = %post.id,
            title = post.title.as_deref().unwrap_or(""),
            scheduled_at = post.scheduled_at,
            reason = error.kind(),
            error = %error,
            "Scheduled post failed to publish"
        );
    }

    async fn authentication_required(&self) {
        tracing::error!("Sign in required to publish scheduled posts");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PostStatus;

    #[tokio::test]
    async fn test_log_notifier_accepts_failures() {
        let post = ScheduledPost {
            id: "30078:owner:slug".to_string(),
            record_id: "r".to_string(),
            owner: "owner".to_string(),
            slug: "slug".to_string(),
            encrypted_payload: String::new(),
            scheduled_at: 1,
            post_kind: 1,
            title: Some("Hello".to_string()),
            status: PostStatus::Scheduled,
            published_event_id: None,
            created_at: 1,
            extra_tags: vec![],
        };
        LogNotifier
            .post_failed(&post, &PublishError::PublishFailed("rejected".into()))
            .await;
        LogNotifier.authentication_required().await;
    }
}
