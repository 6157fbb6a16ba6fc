// Codec between typed scheduled posts and the ordered tag lists of log records

use crate::errors::ValidationError;
use crate::models::{
    post_address, PostStatus, Record, RecordDraft, ScheduledPost, Tag, SCHEDULED_POST_KIND,
};

pub const TAG_SLUG: &str = "d";
pub const TAG_SCHEDULED_AT: &str = "scheduled_at";
pub const TAG_POST_KIND: &str = "post_kind";
pub const TAG_TITLE: &str = "title";
pub const TAG_STATUS: &str = "status";
pub const TAG_PUBLISHED_EVENT_ID: &str = "published_event_id";

const KNOWN_TAGS: [&str; 6] = [
    TAG_SLUG,
    TAG_SCHEDULED_AT,
    TAG_POST_KIND,
    TAG_TITLE,
    TAG_STATUS,
    TAG_PUBLISHED_EVENT_ID,
];

fn tag(name: &str, value: impl Into<String>) -> Tag {
    vec![name.to_string(), value.into()]
}

/// Encode a post into the tag list of its next revision
pub fn encode(post: &ScheduledPost) -> Vec<Tag> {
    let mut tags = vec![
        tag(TAG_SLUG, post.slug.clone()),
        tag(TAG_SCHEDULED_AT, post.scheduled_at.to_string()),
        tag(TAG_POST_KIND, post.post_kind.to_string()),
    ];
    if let Some(title) = &post.title {
        tags.push(tag(TAG_TITLE, title.clone()));
    }
    tags.push(tag(TAG_STATUS, post.status.as_str()));
    if let Some(event_id) = &post.published_event_id {
        tags.push(tag(TAG_PUBLISHED_EVENT_ID, event_id.clone()));
    }
    tags.extend(post.extra_tags.iter().cloned());
    tags
}

/// Draft of a new revision carrying the original encrypted payload verbatim
pub fn revision(post: &ScheduledPost) -> RecordDraft {
    RecordDraft {
        kind: SCHEDULED_POST_KIND,
        tags: encode(post),
        content: post.encrypted_payload.clone(),
    }
}

fn positive_integer(tags: &[Tag], name: &str) -> Result<i64, ValidationError> {
    let raw = crate::models::tag_value(tags, name)
        .ok_or_else(|| ValidationError::MissingTag(name.to_string()))?;
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidTagValue {
            tag: name.to_string(),
            reason: format!("'{}' is not an integer", raw),
        })?;
    if value <= 0 {
        return Err(ValidationError::InvalidTagValue {
            tag: name.to_string(),
            reason: format!("{} must be positive", value),
        });
    }
    Ok(value)
}

/// Decode a log record into a scheduled post
pub fn decode(record: &Record) -> Result<ScheduledPost, ValidationError> {
    if record.kind != SCHEDULED_POST_KIND {
        return Err(ValidationError::UnexpectedKind {
            expected: SCHEDULED_POST_KIND,
            actual: record.kind,
        });
    }

    let slug = record
        .tag_value(TAG_SLUG)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::MissingTag(TAG_SLUG.to_string()))?
        .to_string();

    let scheduled_at = positive_integer(&record.tags, TAG_SCHEDULED_AT)?;
    let post_kind = positive_integer(&record.tags, TAG_POST_KIND)?;
    let post_kind = u32::try_from(post_kind).map_err(|_| ValidationError::InvalidTagValue {
        tag: TAG_POST_KIND.to_string(),
        reason: format!("{} is out of range", post_kind),
    })?;

    let status = match record.tag_value(TAG_STATUS) {
        Some(raw) => raw.parse::<PostStatus>()?,
        None => PostStatus::Scheduled,
    };

    let extra_tags = record
        .tags
        .iter()
        .filter(|t| {
            t.first()
                .map(|name| !KNOWN_TAGS.contains(&name.as_str()))
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    Ok(ScheduledPost {
        id: post_address(record.kind, &record.pubkey, &slug),
        record_id: record.id.clone(),
        owner: record.pubkey.clone(),
        slug,
        encrypted_payload: record.content.clone(),
        scheduled_at,
        post_kind,
        title: record
            .tag_value(TAG_TITLE)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        status,
        published_event_id: record
            .tag_value(TAG_PUBLISHED_EVENT_ID)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        created_at: record.created_at,
        extra_tags,
    })
}
