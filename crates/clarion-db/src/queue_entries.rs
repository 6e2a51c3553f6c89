//! Backlog entries.
//!
//! Positions among `queued` entries stay dense (`1..=n`). Callers that take an
//! entry out of the queued set call [`compact_after`] in the same transaction.

use crate::error::{DatabaseError, Result};
use crate::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use clarion_core::{EntryStatus, JobId};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite, SqlitePool};

/// A job's place in the backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique identifier
    pub id: String,
    /// Job this entry admits
    pub job_id: JobId,
    /// 1-based position among queued entries; kept as-is once dispatched
    pub position: i64,
    /// Entry status
    pub status: EntryStatus,
    /// When the job was admitted
    pub created_at: DateTime<Utc>,
}

type EntryRow = (String, String, i64, String, String);

const ENTRY_COLUMNS: &str = "id, job_id, position, status, created_at";

fn entry_from_row((id, job_id, position, status, created_at): EntryRow) -> Result<QueueEntry> {
    Ok(QueueEntry {
        job_id: job_id
            .parse()
            .map_err(|e| DatabaseError::Decode(format!("invalid job id for entry '{id}': {e}")))?,
        status: status
            .parse()
            .map_err(|e| DatabaseError::Decode(format!("invalid status for entry '{id}': {e}")))?,
        created_at: parse_timestamp(&created_at)?,
        position,
        id,
    })
}

/// The job's queued or processing entry, if any.
pub async fn live_for_job<'e, E>(executor: E, job_id: &JobId) -> Result<Option<QueueEntry>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, EntryRow>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM queue_entries
         WHERE job_id = ? AND status IN ('queued', 'processing')"
    ))
    .bind(job_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.map(entry_from_row).transpose()
}

/// Append a queued entry for `job_id` at `max(queued positions) + 1`.
///
/// # Errors
/// A second live entry for the same job violates the partial unique index;
/// see [`DatabaseError::is_unique_violation`].
pub async fn insert_at_tail<'e, E>(executor: E, job_id: &JobId) -> Result<QueueEntry>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = uuid::Uuid::new_v4().to_string();
    let now = format_timestamp(Utc::now());

    let row = sqlx::query_as::<_, EntryRow>(&format!(
        "INSERT INTO queue_entries (id, job_id, position, status, created_at, updated_at)
         SELECT ?, ?, COALESCE(MAX(position), 0) + 1, 'queued', ?, ?
         FROM queue_entries WHERE status = 'queued'
         RETURNING {ENTRY_COLUMNS}"
    ))
    .bind(&id)
    .bind(job_id.to_string())
    .bind(&now)
    .bind(&now)
    .fetch_one(executor)
    .await?;

    entry_from_row(row)
}

/// The queued entry with the lowest position.
pub async fn head<'e, E>(executor: E) -> Result<Option<QueueEntry>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, EntryRow>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM queue_entries
         WHERE status = 'queued' ORDER BY position ASC LIMIT 1"
    ))
    .fetch_optional(executor)
    .await?;

    row.map(entry_from_row).transpose()
}

/// Compare-and-set an entry's status. Returns whether the entry was in `from`.
pub async fn set_status<'e, E>(
    executor: E,
    entry_id: &str,
    from: EntryStatus,
    to: EntryStatus,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE queue_entries SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(format_timestamp(Utc::now()))
    .bind(entry_id)
    .bind(from.as_str())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Mark the job's `processing` entry terminal. Returns whether one existed.
pub async fn finish_for_job<'e, E>(executor: E, job_id: &JobId, to: EntryStatus) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE queue_entries SET status = ?, updated_at = ?
         WHERE job_id = ? AND status = 'processing'",
    )
    .bind(to.as_str())
    .bind(format_timestamp(Utc::now()))
    .bind(job_id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Close the gap left by a queued entry that held `position`.
pub async fn compact_after<'e, E>(executor: E, position: i64) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE queue_entries SET position = position - 1
         WHERE status = 'queued' AND position > ?",
    )
    .bind(position)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Delete an entry.
pub async fn delete<'e, E>(executor: E, entry_id: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM queue_entries WHERE id = ?")
        .bind(entry_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Position of the job's queued entry.
pub async fn position_of(pool: &SqlitePool, job_id: &JobId) -> Result<Option<i64>> {
    let position = sqlx::query_scalar::<_, i64>(
        "SELECT position FROM queue_entries WHERE job_id = ? AND status = 'queued'",
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;
    Ok(position)
}

/// Live entries: processing ones first (oldest first), then queued by position.
pub async fn snapshot(pool: &SqlitePool) -> Result<Vec<QueueEntry>> {
    let rows = sqlx::query_as::<_, EntryRow>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM queue_entries
         WHERE status IN ('queued', 'processing')
         ORDER BY CASE status WHEN 'processing' THEN 0 ELSE 1 END, position, created_at"
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(entry_from_row).collect()
}
