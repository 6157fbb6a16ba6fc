// Scheduled-post reads: fetch, validate, collapse revisions, cache
//
// Malformed or partially propagated records are expected in the log, so
// validation failures drop the record silently instead of failing the read.

use crate::codec;
use crate::errors::LogError;
use crate::models::{Record, RecordFilter, ScheduledPost};
use crate::record_log::RecordLog;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Newest revision per address, parsed and sorted by scheduled instant
pub fn collapse_revisions(records: Vec<Record>) -> Vec<ScheduledPost> {
    let mut newest: HashMap<(String, String), Record> = HashMap::new();
    for record in records {
        let Some(slug) = record.tag_value("d").map(str::to_string) else {
            debug!(record_id = %record.id, "Dropping scheduled post without slug");
            continue;
        };
        let key = (record.pubkey.clone(), slug);
        match newest.get(&key) {
            Some(current) if !record.supersedes(current) => {}
            _ => {
                newest.insert(key, record);
            }
        }
    }

    let mut posts: Vec<ScheduledPost> = newest
        .into_values()
        .filter_map(|record| match codec::decode(&record) {
            Ok(post) => Some(post),
            Err(e) => {
                debug!(record_id = %record.id, error = %e, "Dropping invalid scheduled post");
                None
            }
        })
        .collect();

    posts.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    posts
}

/// Reads scheduled posts from the log and keeps the latest snapshot
pub struct RecordStore {
    log: Arc<dyn RecordLog>,
    snapshot: RwLock<Vec<ScheduledPost>>,
}

impl RecordStore {
    pub fn new(log: Arc<dyn RecordLog>) -> Self {
        Self {
            log,
            snapshot: RwLock::new(Vec::new()),
        }
    }

    /// Query, validate and parse scheduled posts; no side effects
    #[instrument(skip(self))]
    pub async fn fetch(&self, owner: Option<&str>) -> Result<Vec<ScheduledPost>, LogError> {
        let mut filter = RecordFilter::scheduled_posts();
        if let Some(owner) = owner {
            filter = filter.author(owner);
        }
        let records = self.log.query(&filter).await?;
        let fetched = records.len();
        let posts = collapse_revisions(records);
        debug!(records = fetched, posts = posts.len(), "Scheduled posts fetched");
        Ok(posts)
    }

    /// Replace the cached snapshot with a fresh fetch
    ///
    /// Cached revisions newer than the fetched ones survive, so a lagging
    /// read never rolls back a revision this process already observed.
    #[instrument(skip(self))]
    pub async fn refresh(&self, owner: Option<&str>) -> Result<usize, LogError> {
        let fetched = self.fetch(owner).await?;
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        let posts: Vec<ScheduledPost> = fetched
            .into_iter()
            .map(|post| match snapshot.iter().find(|cached| cached.id == post.id) {
                Some(cached) if cached.supersedes(&post) => cached.clone(),
                _ => post,
            })
            .collect();
        let count = posts.len();
        *snapshot = posts;
        Ok(count)
    }

    /// Fold a revision this process just published into the snapshot
    pub fn observe(&self, record: &Record) {
        match codec::decode(record) {
            Ok(post) => {
                self.merge(post);
            }
            Err(e) => debug!(record_id = %record.id, error = %e, "Ignoring undecodable revision"),
        }
    }

    pub fn snapshot(&self) -> Vec<ScheduledPost> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Cached view of one post
    pub fn cached(&self, post_id: &str) -> Option<ScheduledPost> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|post| post.id == post_id)
            .cloned()
    }

    /// Fresh read of one post by address, merged into the snapshot
    ///
    /// Returns the winning revision after the merge, so a revision this
    /// process observed is not hidden by a read that has not caught up.
    #[instrument(skip(self, post), fields(post_id = %post.id))]
    pub async fn fetch_latest(&self, post: &ScheduledPost) -> Result<Option<ScheduledPost>, LogError> {
        let filter = RecordFilter::scheduled_posts()
            .author(post.owner.clone())
            .slug(post.slug.clone());
        let latest = collapse_revisions(self.log.query(&filter).await?)
            .into_iter()
            .find(|candidate| candidate.id == post.id);

        Ok(latest.map(|latest| self.merge(latest)))
    }

    /// Insert or replace a post in the snapshot unless the cached copy wins
    fn merge(&self, post: ScheduledPost) -> ScheduledPost {
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        match snapshot.iter_mut().find(|cached| cached.id == post.id) {
            Some(cached) if cached.supersedes(&post) => cached.clone(),
            Some(cached) => {
                *cached = post.clone();
                post
            }
            None => {
                snapshot.push(post.clone());
                snapshot.sort_by(|a, b| {
                    a.scheduled_at
                        .cmp(&b.scheduled_at)
                        .then_with(|| a.id.cmp(&b.id))
                });
                post
            }
        }
    }

    /// Refresh again after `delay` to absorb propagation lag
    pub fn schedule_refresh(self: &Arc<Self>, owner: Option<String>, delay: Duration) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = store.refresh(owner.as_deref()).await {
                warn!(error = %e, "Delayed scheduled-post refresh failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{PostStatus, RecordDraft, SCHEDULED_POST_KIND};
    use crate::record_log::InMemoryRecordLog;
    use chrono::Utc;

    fn draft(slug: &str, scheduled_at: &str, status: Option<&str>) -> RecordDraft {
        let mut tags = vec![
            vec!["d".to_string(), slug.to_string()],
            vec!["scheduled_at".to_string(), scheduled_at.to_string()],
            vec!["post_kind".to_string(), "1".to_string()],
        ];
        if let Some(status) = status {
            tags.push(vec!["status".to_string(), status.to_string()]);
        }
        RecordDraft {
            kind: SCHEDULED_POST_KIND,
            tags,
            content: "sealed".to_string(),
        }
    }

    fn store() -> (Arc<InMemoryRecordLog>, RecordStore) {
        let log = Arc::new(InMemoryRecordLog::with_clock(Arc::new(ManualClock::new(
            Utc::now(),
        ))));
        let store = RecordStore::new(log.clone());
        (log, store)
    }

    #[tokio::test]
    async fn test_fetch_sorts_by_scheduled_instant() {
        let (log, store) = store();
        log.publish("alice", draft("late", "300", None)).await.unwrap();
        log.publish("alice", draft("early", "100", None)).await.unwrap();
        log.publish("alice", draft("middle", "200", None)).await.unwrap();

        let slugs: Vec<String> = store
            .fetch(None)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.slug)
            .collect();
        assert_eq!(slugs, vec!["early", "middle", "late"]);
    }

    #[tokio::test]
    async fn test_fetch_prefers_newest_revision() {
        let (log, store) = store();
        log.publish("alice", draft("post", "100", None)).await.unwrap();
        log.publish("alice", draft("post", "100", Some("cancelled")))
            .await
            .unwrap();

        let posts = store.fetch(Some("alice")).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].status, PostStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_fetch_drops_invalid_records() {
        let (log, store) = store();
        log.publish("alice", draft("ok", "100", None)).await.unwrap();
        log.publish("alice", draft("bad-time", "abc", None)).await.unwrap();
        log.publish(
            "alice",
            RecordDraft {
                kind: SCHEDULED_POST_KIND,
                tags: vec![
                    vec!["d".to_string(), "no-time".to_string()],
                    vec!["post_kind".to_string(), "1".to_string()],
                ],
                content: String::new(),
            },
        )
        .await
        .unwrap();

        let posts = store.fetch(None).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].slug, "ok");
    }

    #[tokio::test]
    async fn test_fetch_filters_by_owner() {
        let (log, store) = store();
        log.publish("alice", draft("a", "100", None)).await.unwrap();
        log.publish("bob", draft("b", "100", None)).await.unwrap();

        assert_eq!(store.fetch(Some("bob")).await.unwrap().len(), 1);
        assert_eq!(store.fetch(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_and_fetch_latest_update_snapshot() {
        let (log, store) = store();
        log.publish("alice", draft("post", "100", None)).await.unwrap();
        store.refresh(Some("alice")).await.unwrap();

        let cached = store.snapshot().remove(0);
        assert_eq!(cached.status, PostStatus::Scheduled);

        log.publish("alice", draft("post", "100", Some("failed")))
            .await
            .unwrap();
        assert_eq!(store.cached(&cached.id).unwrap().status, PostStatus::Scheduled);

        let latest = store.fetch_latest(&cached).await.unwrap().unwrap();
        assert_eq!(latest.status, PostStatus::Failed);
        assert_eq!(store.cached(&cached.id).unwrap().status, PostStatus::Failed);
    }

    #[tokio::test]
    async fn test_lagging_refresh_keeps_observed_revision() {
        let clock = ManualClock::new(Utc::now());
        let log = Arc::new(
            InMemoryRecordLog::with_clock(Arc::new(clock.clone()))
                .with_propagation_lag(chrono::Duration::seconds(5)),
        );
        let store = RecordStore::new(log.clone());

        log.publish("alice", draft("post", "100", None)).await.unwrap();
        clock.advance(chrono::Duration::seconds(5));
        store.refresh(None).await.unwrap();

        let revision = log
            .publish("alice", draft("post", "100", Some("published")))
            .await
            .unwrap();
        store.observe(&revision);
        store.refresh(None).await.unwrap();

        assert_eq!(store.snapshot()[0].status, PostStatus::Published);
    }

    #[tokio::test]
    async fn test_lagging_fetch_latest_returns_observed_revision() {
        let clock = ManualClock::new(Utc::now());
        let log = Arc::new(
            InMemoryRecordLog::with_clock(Arc::new(clock.clone()))
                .with_propagation_lag(chrono::Duration::seconds(60)),
        );
        let store = RecordStore::new(log.clone());

        log.publish("alice", draft("post", "100", None)).await.unwrap();
        clock.advance(chrono::Duration::seconds(60));
        store.refresh(None).await.unwrap();
        let scheduled = store.snapshot().remove(0);

        let failed = log
            .publish("alice", draft("post", "100", Some("failed")))
            .await
            .unwrap();
        store.observe(&failed);

        let latest = store.fetch_latest(&scheduled).await.unwrap().unwrap();
        assert_eq!(latest.status, PostStatus::Failed);
        assert_eq!(latest.record_id, failed.id);
    }

    #[tokio::test]
    async fn test_same_second_revisions_agree_with_fetch() {
        let first = Record::from_draft("alice", 100, draft("post", "100", None));
        let second = Record::from_draft("alice", 100, draft("post", "100", Some("failed")));
        let winner = if first.id < second.id { &first } else { &second };

        for order in [[&first, &second], [&second, &first]] {
            let (_, store) = store();
            for record in order {
                store.observe(record);
            }
            assert_eq!(store.snapshot()[0].record_id, winner.id);
        }

        let posts = collapse_revisions(vec![first.clone(), second.clone()]);
        assert_eq!(posts[0].record_id, winner.id);
    }
}
