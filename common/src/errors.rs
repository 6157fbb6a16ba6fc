// Error handling framework for the scheduled-post publisher

use crate::models::PostStatus;
use thiserror::Error;

/// Structural problems found while decoding a scheduled-post record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required tag: {0}")]
    MissingTag(String),

    #[error("Invalid tag value for {tag}: {reason}")]
    InvalidTagValue { tag: String, reason: String },

    #[error("Unexpected record kind {actual}, expected {expected}")]
    UnexpectedKind { expected: u32, actual: u32 },

    #[error("Unknown post status: {0}")]
    UnknownStatus(String),
}

/// Errors reported by the record log
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The log already holds a record with this id
    #[error("Record already published: {id}")]
    Duplicate { id: String },

    #[error("Record rejected: {0}")]
    Rejected(String),

    #[error("Record log unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),
}

/// Shared storage and database errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Redis error: {0}")]
    RedisError(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Errors raised by the identity provider's cipher
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("Ciphertext authentication failed")]
    AuthenticationFailed,

    #[error("Identity {0} cannot decrypt for this owner")]
    WrongOwner(String),
}

/// Outcome classification for a single publish attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("No identity available to decrypt and publish")]
    AuthenticationRequired,

    /// Success-equivalent: another attempt already published this post
    #[error("Post already published{}", .content_id.as_ref().map(|id| format!(" as {}", id)).unwrap_or_default())]
    AlreadyPublished { content_id: Option<String> },

    #[error("Publish lock held by another session")]
    LockHeld,

    #[error("Publish lock lost before publishing")]
    LockLost,

    #[error("Failed to decrypt draft: {0}")]
    DecryptionFailed(String),

    #[error("Failed to publish content: {0}")]
    PublishFailed(String),

    /// The primary content is live, only the status revision is missing
    #[error("Content {content_id} published but status update failed: {reason}")]
    StatusUpdatePublishFailed { content_id: String, reason: String },
}

impl PublishError {
    /// Failures that move the post to `failed` and are reported to the user
    pub fn marks_failed(&self) -> bool {
        matches!(
            self,
            PublishError::DecryptionFailed(_) | PublishError::PublishFailed(_)
        )
    }

    /// Failures retried on the next tick without touching the post
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::LockHeld | PublishError::LockLost)
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::AuthenticationRequired => "authentication_required",
            PublishError::AlreadyPublished { .. } => "already_published",
            PublishError::LockHeld => "lock_held",
            PublishError::LockLost => "lock_lost",
            PublishError::DecryptionFailed(_) => "decryption_failed",
            PublishError::PublishFailed(_) => "publish_failed",
            PublishError::StatusUpdatePublishFailed { .. } => "status_update_failed",
        }
    }
}

/// Errors from the status updater
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdateError {
    #[error("Cannot move post from {from} to {to}")]
    InvalidTransition { from: PostStatus, to: PostStatus },

    #[error(transparent)]
    Log(#[from] LogError),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::RedisError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidJson(err.to_string())
    }
}

impl From<sqlx::Error> for LogError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                LogError::Unavailable(err.to_string())
            }
            _ => LogError::Query(err.to_string()),
        }
    }
}
