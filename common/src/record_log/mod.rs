// Append-only addressable record log: the publish and query primitives

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRecordLog;
pub use postgres::PostgresRecordLog;

use crate::errors::LogError;
use crate::models::{Record, RecordDraft, RecordFilter};
use async_trait::async_trait;

/// Publish and query primitives of the underlying log
///
/// `query` may return several revisions of one addressable record and may lag
/// behind `publish`; readers pick the newest revision themselves.
#[async_trait]
pub trait RecordLog: Send + Sync {
    /// Append a record authored by `owner`, assigning its id
    ///
    /// Fails with [`LogError::Duplicate`] when an identical record already exists.
    async fn publish(&self, owner: &str, draft: RecordDraft) -> Result<Record, LogError>;

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>, LogError>;
}

/// Timestamp for a new record so a revision never ties with or predates the one it replaces
pub(crate) fn revision_timestamp(now: i64, previous: Option<i64>) -> i64 {
    match previous {
        Some(previous) if previous >= now => previous + 1,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_timestamp_is_monotonic() {
        assert_eq!(revision_timestamp(100, None), 100);
        assert_eq!(revision_timestamp(100, Some(50)), 100);
        assert_eq!(revision_timestamp(100, Some(100)), 101);
        assert_eq!(revision_timestamp(100, Some(120)), 121);
    }
}
