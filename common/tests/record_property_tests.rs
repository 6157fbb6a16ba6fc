// Property-based tests for scheduled-post parsing and revision selection

use common::codec;
use common::models::{Record, RecordDraft, SCHEDULED_POST_KIND};
use common::record_store::collapse_revisions;
use proptest::prelude::*;

fn record(slug: &str, created_at: i64, scheduled_at: &str, status: &str) -> Record {
    Record::from_draft(
        "npub1alice",
        created_at,
        RecordDraft {
            kind: SCHEDULED_POST_KIND,
            tags: vec![
                vec!["d".to_string(), slug.to_string()],
                vec!["scheduled_at".to_string(), scheduled_at.to_string()],
                vec!["post_kind".to_string(), "1".to_string()],
                vec!["status".to_string(), status.to_string()],
            ],
            content: "sealed".to_string(),
        },
    )
}

/// **Property: Non-numeric schedule timestamps are excluded**
#[test]
fn property_invalid_scheduled_at_is_excluded() {
    proptest!(|(raw in "[a-zA-Z ]{0,10}")| {
        let posts = collapse_revisions(vec![record("post", 100, &raw, "scheduled")]);
        prop_assert!(posts.is_empty());
    });
}

/// **Property: Positive timestamps parse verbatim**
#[test]
fn property_valid_scheduled_at_is_kept() {
    proptest!(|(scheduled_at in 1i64..4_000_000_000i64)| {
        let posts = collapse_revisions(vec![record("post", 100, &scheduled_at.to_string(), "scheduled")]);
        prop_assert_eq!(posts.len(), 1);
        prop_assert_eq!(posts[0].scheduled_at, scheduled_at);
    });
}

/// **Property: Newest revision wins regardless of arrival order**
#[test]
fn property_newest_revision_wins() {
    proptest!(|(
        created in proptest::collection::btree_set(1i64..1_000_000i64, 2..8),
        rotate in 0usize..8usize,
    )| {
        let created: Vec<i64> = created.into_iter().collect();
        let newest = *created.last().unwrap();
        let mut records: Vec<Record> = created
            .iter()
            .map(|at| {
                let status = if *at == newest { "cancelled" } else { "scheduled" };
                record("post", *at, "100", status)
            })
            .collect();
        let len = records.len();
        records.rotate_left(rotate % len);

        let posts = collapse_revisions(records);
        prop_assert_eq!(posts.len(), 1);
        prop_assert_eq!(posts[0].created_at, newest);
        prop_assert_eq!(posts[0].status.as_str(), "cancelled");
    });
}

#[test]
fn test_missing_scheduled_at_is_excluded() {
    let mut without = record("post", 100, "100", "scheduled");
    without.tags.retain(|tag| tag[0] != "scheduled_at");
    assert!(codec::decode(&without).is_err());
    assert!(collapse_revisions(vec![without]).is_empty());
}

#[test]
fn test_unknown_status_is_excluded() {
    assert!(collapse_revisions(vec![record("post", 100, "100", "archived")]).is_empty());
}

#[test]
fn test_same_second_revisions_break_ties_by_id() {
    let first = record("post", 100, "100", "scheduled");
    let second = record("post", 100, "100", "failed");
    let expected = if first.id < second.id { "scheduled" } else { "failed" };

    let posts = collapse_revisions(vec![first, second]);
    assert_eq!(posts[0].status.as_str(), expected);
}
