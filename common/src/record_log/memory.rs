// In-process record log with optional propagation lag

use super::{revision_timestamp, RecordLog};
use crate::clock::{Clock, SystemClock};
use crate::errors::LogError;
use crate::models::{Record, RecordDraft, RecordFilter};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

struct StoredRecord {
    record: Record,
    visible_at: DateTime<Utc>,
}

struct InjectedFailure {
    kind: Option<u32>,
    error: LogError,
}

#[derive(Default)]
struct LogState {
    records: Vec<StoredRecord>,
    failures: VecDeque<InjectedFailure>,
    publish_attempts: Vec<u32>,
}

/// Shared in-memory log; clones see the same records
///
/// Published records become visible to queries only after the configured lag,
/// which mimics an eventually-consistent relay network.
#[derive(Clone)]
pub struct InMemoryRecordLog {
    state: Arc<Mutex<LogState>>,
    clock: Arc<dyn Clock>,
    lag: Duration,
}

impl Default for InMemoryRecordLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordLog {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LogState::default())),
            clock,
            lag: Duration::zero(),
        }
    }

    /// Delay before a published record shows up in queries
    pub fn with_propagation_lag(mut self, lag: Duration) -> Self {
        self.lag = lag;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next publish of `kind` (any kind when `None`) with `error`
    pub fn fail_next_publish(&self, kind: Option<u32>, error: LogError) {
        self.state()
            .failures
            .push_back(InjectedFailure { kind, error });
    }

    /// Store a record exactly as given, bypassing id assignment
    pub fn insert_raw(&self, record: Record) {
        let visible_at = self.clock.now();
        self.state().records.push(StoredRecord { record, visible_at });
    }

    /// Number of publish calls seen for a kind, failed ones included
    pub fn publish_attempts(&self, kind: u32) -> usize {
        self.state()
            .publish_attempts
            .iter()
            .filter(|k| **k == kind)
            .count()
    }

    /// Every stored record of a kind regardless of visibility
    pub fn records_of_kind(&self, kind: u32) -> Vec<Record> {
        self.state()
            .records
            .iter()
            .filter(|stored| stored.record.kind == kind)
            .map(|stored| stored.record.clone())
            .collect()
    }
}

#[async_trait]
impl RecordLog for InMemoryRecordLog {
    #[instrument(skip(self, draft), fields(kind = draft.kind))]
    async fn publish(&self, owner: &str, draft: RecordDraft) -> Result<Record, LogError> {
        let now = self.clock.now();
        let mut state = self.state();
        state.publish_attempts.push(draft.kind);

        if let Some(position) = state
            .failures
            .iter()
            .position(|f| f.kind.map(|k| k == draft.kind).unwrap_or(true))
        {
            if let Some(failure) = state.failures.remove(position) {
                debug!(error = %failure.error, "Injected publish failure");
                return Err(failure.error);
            }
        }

        let slug = crate::models::tag_value(&draft.tags, "d").map(str::to_string);
        let previous = match (&slug, (30000..40000).contains(&draft.kind)) {
            (Some(slug), true) => state
                .records
                .iter()
                .filter(|s| {
                    s.record.kind == draft.kind
                        && s.record.pubkey == owner
                        && s.record.tag_value("d") == Some(slug.as_str())
                })
                .map(|s| s.record.created_at)
                .max(),
            _ => None,
        };

        let created_at = revision_timestamp(now.timestamp(), previous);
        let record = Record::from_draft(owner, created_at, draft);

        if state.records.iter().any(|s| s.record.id == record.id) {
            return Err(LogError::Duplicate { id: record.id });
        }

        state.records.push(StoredRecord {
            record: record.clone(),
            visible_at: now + self.lag,
        });
        debug!(record_id = %record.id, "Record appended");
        Ok(record)
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>, LogError> {
        let now = self.clock.now();
        Ok(self
            .state()
            .records
            .iter()
            .filter(|stored| stored.visible_at <= now && filter.matches(&stored.record))
            .map(|stored| stored.record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{SCHEDULED_POST_KIND, TEXT_NOTE_KIND};

    fn note(content: &str) -> RecordDraft {
        RecordDraft {
            kind: TEXT_NOTE_KIND,
            tags: vec![],
            content: content.to_string(),
        }
    }

    fn revision(slug: &str, content: &str) -> RecordDraft {
        RecordDraft {
            kind: SCHEDULED_POST_KIND,
            tags: vec![vec!["d".to_string(), slug.to_string()]],
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_and_query() {
        let log = InMemoryRecordLog::new();
        let record = log.publish("alice", note("hello")).await.unwrap();
        assert_eq!(record.pubkey, "alice");

        let found = log
            .query(&RecordFilter::default().id(record.id.clone()))
            .await
            .unwrap();
        assert_eq!(found, vec![record]);
    }

    #[tokio::test]
    async fn test_identical_publish_is_duplicate() {
        let clock = ManualClock::new(Utc::now());
        let log = InMemoryRecordLog::with_clock(Arc::new(clock));
        log.publish("alice", note("same")).await.unwrap();
        let err = log.publish("alice", note("same")).await.unwrap_err();
        assert!(matches!(err, LogError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_revisions_never_share_a_timestamp() {
        let clock = ManualClock::new(Utc::now());
        let log = InMemoryRecordLog::with_clock(Arc::new(clock));
        let first = log.publish("alice", revision("s", "v1")).await.unwrap();
        let second = log.publish("alice", revision("s", "v2")).await.unwrap();
        assert!(second.supersedes(&first));
    }

    #[tokio::test]
    async fn test_propagation_lag_hides_new_records() {
        let clock = ManualClock::new(Utc::now());
        let log = InMemoryRecordLog::with_clock(Arc::new(clock.clone()))
            .with_propagation_lag(Duration::seconds(3));
        log.publish("alice", note("later")).await.unwrap();

        assert!(log.query(&RecordFilter::default()).await.unwrap().is_empty());
        clock.advance(Duration::seconds(3));
        assert_eq!(log.query(&RecordFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_targets_kind() {
        let log = InMemoryRecordLog::new();
        log.fail_next_publish(
            Some(SCHEDULED_POST_KIND),
            LogError::Rejected("blocked".to_string()),
        );

        assert!(log.publish("alice", note("fine")).await.is_ok());
        assert!(log.publish("alice", revision("s", "x")).await.is_err());
        assert!(log.publish("alice", revision("s", "x")).await.is_ok());
        assert_eq!(log.publish_attempts(SCHEDULED_POST_KIND), 2);
        assert_eq!(log.publish_attempts(TEXT_NOTE_KIND), 1);
    }
}
