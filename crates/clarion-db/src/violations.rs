//! Violation records: one row per rule firing on a scanned page.

use crate::error::{DatabaseError, Result};
use crate::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use clarion_core::{AffectedNode, AuditViolation, ImpactLevel, JobId};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite, SqlitePool};

/// Stored violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    /// Unique identifier
    pub id: String,
    /// Job the page belongs to
    pub job_id: JobId,
    /// Page the rule fired on
    pub page_url: String,
    /// Severity
    pub impact: ImpactLevel,
    /// Rule identifier
    pub rule_id: String,
    /// Rule description
    pub help: String,
    /// Affected nodes
    pub nodes: Vec<AffectedNode>,
    /// When the record was written
    pub created_at: DateTime<Utc>,
}

/// Insert one violation found on `page_url`.
pub async fn insert<'e, E>(
    executor: E,
    job_id: &JobId,
    page_url: &str,
    violation: &AuditViolation,
) -> Result<String>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = uuid::Uuid::new_v4().to_string();
    let nodes = serde_json::to_string(&violation.nodes)
        .map_err(|e| DatabaseError::SerializationError(format!("violation nodes: {e}")))?;

    sqlx::query(
        "INSERT INTO violations (id, job_id, page_url, impact, rule_id, help, nodes, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(job_id.to_string())
    .bind(page_url)
    .bind(violation.impact.as_str())
    .bind(&violation.rule_id)
    .bind(&violation.help)
    .bind(nodes)
    .bind(format_timestamp(Utc::now()))
    .execute(executor)
    .await?;

    Ok(id)
}

/// All violations of a job in insertion order.
pub async fn list_for_job(pool: &SqlitePool, job_id: &JobId) -> Result<Vec<ViolationRecord>> {
    let rows = sqlx::query_as::<_, (String, String, String, String, String, String, String)>(
        "SELECT id, page_url, impact, rule_id, help, nodes, created_at
         FROM violations WHERE job_id = ? ORDER BY created_at, rowid",
    )
    .bind(job_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(id, page_url, impact, rule_id, help, nodes, created_at)| {
            let nodes: Vec<AffectedNode> = serde_json::from_str(&nodes).map_err(|e| {
                DatabaseError::Decode(format!("invalid nodes for violation '{id}': {e}"))
            })?;
            Ok(ViolationRecord {
                impact: impact.parse().map_err(|e| {
                    DatabaseError::Decode(format!("invalid impact for violation '{id}': {e}"))
                })?,
                job_id: *job_id,
                page_url,
                rule_id,
                help,
                nodes,
                created_at: parse_timestamp(&created_at)?,
                id,
            })
        })
        .collect()
}

/// Number of violation rows for a job.
pub async fn count_for_job(pool: &SqlitePool, job_id: &JobId) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM violations WHERE job_id = ?")
        .bind(job_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}
