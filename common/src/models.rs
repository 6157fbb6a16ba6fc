use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::errors::ValidationError;

/// Record kind holding scheduled-post revisions
pub const SCHEDULED_POST_KIND: u32 = 30078;

/// Record kind of a plain text note
pub const TEXT_NOTE_KIND: u32 = 1;

/// An ordered tag: name followed by values
pub type Tag = Vec<String>;

// ============================================================================
// Log Records
// ============================================================================

/// A record as stored in the append-only log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl Record {
    /// Build a record from a draft, assigning its content-derived id
    pub fn from_draft(owner: &str, created_at: i64, draft: RecordDraft) -> Self {
        let id = compute_record_id(owner, created_at, draft.kind, &draft.tags, &draft.content);
        Self {
            id,
            pubkey: owner.to_string(),
            created_at,
            kind: draft.kind,
            tags: draft.tags,
            content: draft.content,
        }
    }

    /// First value of the first tag with this name
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        tag_value(&self.tags, name)
    }

    /// Whether this is an addressable record (newest revision per slug wins)
    pub fn is_addressable(&self) -> bool {
        (30000..40000).contains(&self.kind)
    }

    /// `kind:pubkey:d` address for addressable records
    pub fn address(&self) -> Option<String> {
        if !self.is_addressable() {
            return None;
        }
        self.tag_value("d")
            .map(|slug| post_address(self.kind, &self.pubkey, slug))
    }

    /// True when `self` supersedes `other` as a revision of the same address
    pub fn supersedes(&self, other: &Record) -> bool {
        self.created_at > other.created_at
            || (self.created_at == other.created_at && self.id < other.id)
    }
}

/// The unsigned part of a record handed to the publish primitive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

/// Lowercase hex SHA-256 of the canonical `[0, pubkey, created_at, kind, tags, content]` array
pub fn compute_record_id(
    pubkey: &str,
    created_at: i64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> String {
    let canonical = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Address identifying every revision of one scheduled post
pub fn post_address(kind: u32, owner: &str, slug: &str) -> String {
    format!("{}:{}:{}", kind, owner, slug)
}

pub fn tag_value<'a>(tags: &'a [Tag], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|tag| tag.first().map(String::as_str) == Some(name))
        .and_then(|tag| tag.get(1))
        .map(String::as_str)
}

/// Query filter understood by every record log backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub kinds: Vec<u32>,
    pub authors: Vec<String>,
    /// Restrict to these `d` tag values
    pub slugs: Vec<String>,
    pub ids: Vec<String>,
}

impl RecordFilter {
    pub fn scheduled_posts() -> Self {
        Self {
            kinds: vec![SCHEDULED_POST_KIND],
            ..Default::default()
        }
    }

    pub fn author(mut self, owner: impl Into<String>) -> Self {
        self.authors.push(owner.into());
        self
    }

    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slugs.push(slug.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.ids.push(id.into());
        self
    }

    /// Empty criteria match everything
    pub fn matches(&self, record: &Record) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&record.kind))
            && (self.authors.is_empty() || self.authors.contains(&record.pubkey))
            && (self.ids.is_empty() || self.ids.contains(&record.id))
            && (self.slugs.is_empty()
                || record
                    .tag_value("d")
                    .map(|d| self.slugs.iter().any(|s| s == d))
                    .unwrap_or(false))
    }
}

// ============================================================================
// Scheduled Post Models
// ============================================================================

/// Lifecycle state of a scheduled post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Scheduled,
    Published,
    Failed,
    Cancelled,
}

impl PostStatus {
    /// Published and cancelled posts are never revised by the scheduler
    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Published | PostStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: PostStatus) -> bool {
        match (self, next) {
            (PostStatus::Scheduled, PostStatus::Published)
            | (PostStatus::Scheduled, PostStatus::Failed)
            | (PostStatus::Scheduled, PostStatus::Cancelled) => true,
            // Same-status revisions are harmless for non-terminal states
            (PostStatus::Failed, PostStatus::Failed) => true,
            // A failed post may still be cancelled by hand
            (PostStatus::Failed, PostStatus::Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(PostStatus::Scheduled),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            "cancelled" => Ok(PostStatus::Cancelled),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// A scheduled post parsed from its newest log revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledPost {
    /// Address shared by every revision of this post
    pub id: String,
    /// Id of the log record this instance was parsed from
    pub record_id: String,
    pub owner: String,
    pub slug: String,
    /// Encrypted draft, carried verbatim into every revision
    pub encrypted_payload: String,
    /// Unix seconds
    pub scheduled_at: i64,
    pub post_kind: u32,
    pub title: Option<String>,
    pub status: PostStatus,
    pub published_event_id: Option<String>,
    pub created_at: i64,
    /// Tags this subsystem does not interpret
    pub extra_tags: Vec<Tag>,
}

impl ScheduledPost {
    pub fn scheduled_instant(&self) -> Option<DateTime<Utc>> {
        if self.scheduled_at <= 0 {
            return None;
        }
        DateTime::from_timestamp(self.scheduled_at, 0)
    }

    /// Still scheduled and not linked to any published content
    pub fn is_awaiting_publish(&self) -> bool {
        self.status == PostStatus::Scheduled && self.published_event_id.is_none()
    }

    /// Same ordering as [`Record::supersedes`]: newer first, then lower record id
    pub fn supersedes(&self, other: &ScheduledPost) -> bool {
        self.created_at > other.created_at
            || (self.created_at == other.created_at && self.record_id < other.record_id)
    }
}

// ============================================================================
// Draft Payload
// ============================================================================

/// Decrypted draft describing the content to publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftPayload {
    pub kind: u32,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<MediaItem>>,
}

/// Media attached to a draft
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    /// Provenance metadata as `[key, value]` pairs
    #[serde(default)]
    pub tags: Vec<Tag>,
}
