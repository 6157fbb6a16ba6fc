// PostgreSQL-backed record log

use super::{revision_timestamp, RecordLog};
use crate::clock::{Clock, SystemClock};
use crate::db::DbPool;
use crate::errors::LogError;
use crate::models::{Record, RecordDraft, RecordFilter, Tag};
use async_trait::async_trait;
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Record log stored in the `records` table
pub struct PostgresRecordLog {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl PostgresRecordLog {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    async fn latest_revision_at(
        &self,
        owner: &str,
        kind: u32,
        slug: &str,
    ) -> Result<Option<i64>, LogError> {
        let row = sqlx::query(
            r#"
            SELECT MAX(created_at) AS latest
            FROM records
            WHERE kind = $1 AND pubkey = $2 AND slug = $3
            "#,
        )
        .bind(kind as i32)
        .bind(owner)
        .bind(slug)
        .fetch_one(self.pool.pool())
        .await?;

        Ok(row.try_get::<Option<i64>, _>("latest")?)
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<Record, LogError> {
    let tags: serde_json::Value = row.try_get("tags")?;
    let tags: Vec<Tag> = serde_json::from_value(tags)
        .map_err(|e| LogError::Query(format!("Invalid tags column: {}", e)))?;
    let kind: i32 = row.try_get("kind")?;

    Ok(Record {
        id: row.try_get("id")?,
        pubkey: row.try_get("pubkey")?,
        created_at: row.try_get("created_at")?,
        kind: u32::try_from(kind)
            .map_err(|_| LogError::Query(format!("Invalid kind column: {}", kind)))?,
        tags,
        content: row.try_get("content")?,
    })
}

#[async_trait]
impl RecordLog for PostgresRecordLog {
    #[instrument(skip(self, draft), fields(kind = draft.kind))]
    async fn publish(&self, owner: &str, draft: RecordDraft) -> Result<Record, LogError> {
        let slug = crate::models::tag_value(&draft.tags, "d").map(str::to_string);
        let previous = match &slug {
            Some(slug) if (30000..40000).contains(&draft.kind) => {
                self.latest_revision_at(owner, draft.kind, slug).await?
            }
            _ => None,
        };

        let created_at = revision_timestamp(self.clock.now().timestamp(), previous);
        let record = Record::from_draft(owner, created_at, draft);
        let tags = serde_json::to_value(&record.tags)
            .map_err(|e| LogError::Rejected(format!("Unserializable tags: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO records (id, pubkey, created_at, kind, tags, content, slug)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.pubkey)
        .bind(record.created_at)
        .bind(record.kind as i32)
        .bind(tags)
        .bind(&record.content)
        .bind(&slug)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(LogError::Duplicate { id: record.id });
        }

        debug!(record_id = %record.id, "Record inserted");
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>, LogError> {
        let mut sql = String::from(
            "SELECT id, pubkey, created_at, kind, tags, content FROM records WHERE TRUE",
        );
        let mut param = 1;

        if !filter.kinds.is_empty() {
            sql.push_str(&format!(" AND kind = ANY(${})", param));
            param += 1;
        }
        if !filter.authors.is_empty() {
            sql.push_str(&format!(" AND pubkey = ANY(${})", param));
            param += 1;
        }
        if !filter.slugs.is_empty() {
            sql.push_str(&format!(" AND slug = ANY(${})", param));
            param += 1;
        }
        if !filter.ids.is_empty() {
            sql.push_str(&format!(" AND id = ANY(${})", param));
        }
        sql.push_str(" ORDER BY created_at ASC");

        let mut query = sqlx::query(&sql);
        if !filter.kinds.is_empty() {
            let kinds: Vec<i32> = filter.kinds.iter().map(|k| *k as i32).collect();
            query = query.bind(kinds);
        }
        if !filter.authors.is_empty() {
            query = query.bind(filter.authors.clone());
        }
        if !filter.slugs.is_empty() {
            query = query.bind(filter.slugs.clone());
        }
        if !filter.ids.is_empty() {
            query = query.bind(filter.ids.clone());
        }

        let rows = query.fetch_all(self.pool.pool()).await?;
        rows.iter().map(decode_row).collect()
    }
}
