//! Recurring crawl definitions.

use crate::error::{DatabaseError, Result};
use crate::{format_timestamp, parse_optional_timestamp, parse_timestamp, Database};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clarion_core::{AuditStandard, CrawlBounds, JobId, ScheduleId};
use clarion_scheduler::{
    Frequency, JobTemplate, ScheduleDefinition, ScheduleStore, SchedulerError,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const SCHEDULE_COLUMNS: &str = "id, root_url, depth_limit, page_limit, crawl_rate, wcag_version, \
    conformance_level, frequency, next_scheduled_run, last_run_at, origin_job_id, enabled";

fn decode<T>(value: &str, column: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| DatabaseError::Decode(format!("invalid {column} '{value}': {e}")))
}

fn decode_u32(row: &SqliteRow, column: &str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value)
        .map_err(|_| DatabaseError::Decode(format!("{column} out of range: {value}")))
}

fn schedule_from_row(row: &SqliteRow) -> Result<ScheduleDefinition> {
    let id: String = row.try_get("id")?;
    let wcag_version: String = row.try_get("wcag_version")?;
    let conformance_level: String = row.try_get("conformance_level")?;
    let frequency: String = row.try_get("frequency")?;
    let next_scheduled_run: String = row.try_get("next_scheduled_run")?;
    let last_run_at: Option<String> = row.try_get("last_run_at")?;
    let origin_job_id: Option<String> = row.try_get("origin_job_id")?;
    let enabled: i64 = row.try_get("enabled")?;

    Ok(ScheduleDefinition {
        id: decode(&id, "schedule id")?,
        template: JobTemplate {
            root_url: row.try_get("root_url")?,
            bounds: CrawlBounds {
                depth_limit: decode_u32(row, "depth_limit")?,
                page_limit: decode_u32(row, "page_limit")?,
                crawl_rate: decode_u32(row, "crawl_rate")?,
            },
            standard: AuditStandard {
                version: decode(&wcag_version, "wcag_version")?,
                level: decode(&conformance_level, "conformance_level")?,
            },
        },
        frequency: decode::<Frequency>(&frequency, "frequency")?,
        next_scheduled_run: parse_timestamp(&next_scheduled_run)?,
        last_run_at: parse_optional_timestamp(last_run_at.as_deref())?,
        origin_job_id: origin_job_id
            .as_deref()
            .map(|s| decode::<JobId>(s, "origin_job_id"))
            .transpose()?,
        enabled: enabled != 0,
    })
}

/// Store a new enabled definition.
pub async fn create(
    pool: &SqlitePool,
    template: JobTemplate,
    frequency: Frequency,
    next_scheduled_run: DateTime<Utc>,
    origin_job_id: Option<JobId>,
) -> Result<ScheduleDefinition> {
    let schedule = ScheduleDefinition {
        id: ScheduleId::generate(),
        template,
        frequency,
        next_scheduled_run,
        last_run_at: None,
        origin_job_id,
        enabled: true,
    };

    sqlx::query(
        "INSERT INTO schedules (id, root_url, depth_limit, page_limit, crawl_rate, wcag_version,
             conformance_level, frequency, next_scheduled_run, origin_job_id, enabled, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
    )
    .bind(schedule.id.to_string())
    .bind(&schedule.template.root_url)
    .bind(i64::from(schedule.template.bounds.depth_limit))
    .bind(i64::from(schedule.template.bounds.page_limit))
    .bind(i64::from(schedule.template.bounds.crawl_rate))
    .bind(schedule.template.standard.version.as_str())
    .bind(schedule.template.standard.level.as_str())
    .bind(frequency.as_str())
    .bind(format_timestamp(next_scheduled_run))
    .bind(origin_job_id.map(|id| id.to_string()))
    .bind(format_timestamp(Utc::now()))
    .execute(pool)
    .await?;

    tracing::info!(
        schedule_id = %schedule.id,
        "Created {} schedule for {}",
        frequency,
        schedule.template.root_url
    );
    Ok(schedule)
}

/// Fetch one definition.
///
/// # Errors
/// Returns `DatabaseError::NotFound` if no definition has this id.
pub async fn get(pool: &SqlitePool, id: &ScheduleId) -> Result<ScheduleDefinition> {
    let row = sqlx::query(&format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("schedule '{id}' not found")))?;

    schedule_from_row(&row)
}

/// Every definition, soonest next run first.
pub async fn list(pool: &SqlitePool) -> Result<Vec<ScheduleDefinition>> {
    let rows = sqlx::query(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules ORDER BY next_scheduled_run"
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(schedule_from_row).collect()
}

/// Enabled definitions with `next_scheduled_run <= now`.
pub async fn due(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<ScheduleDefinition>> {
    let rows = sqlx::query(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules
         WHERE enabled = 1 AND next_scheduled_run <= ?
         ORDER BY next_scheduled_run"
    ))
    .bind(format_timestamp(now))
    .fetch_all(pool)
    .await?;

    rows.iter().map(schedule_from_row).collect()
}

/// Update a definition's `next_scheduled_run` and `last_run_at` timestamps.
pub async fn record_run(
    pool: &SqlitePool,
    id: &ScheduleId,
    next_run: DateTime<Utc>,
    ran_at: DateTime<Utc>,
) -> Result<()> {
    let result =
        sqlx::query("UPDATE schedules SET next_scheduled_run = ?, last_run_at = ? WHERE id = ?")
            .bind(format_timestamp(next_run))
            .bind(format_timestamp(ran_at))
            .bind(id.to_string())
            .execute(pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound(format!(
            "schedule '{id}' not found"
        )));
    }

    Ok(())
}

/// Enable or pause a definition.
pub async fn set_enabled(pool: &SqlitePool, id: &ScheduleId, enabled: bool) -> Result<()> {
    let result = sqlx::query("UPDATE schedules SET enabled = ? WHERE id = ?")
        .bind(i64::from(enabled))
        .bind(id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound(format!(
            "schedule '{id}' not found"
        )));
    }

    Ok(())
}

#[async_trait]
impl ScheduleStore for Database {
    async fn due_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> clarion_scheduler::Result<Vec<ScheduleDefinition>> {
        due(self.pool(), now)
            .await
            .map_err(|e| SchedulerError::Store(e.to_string()))
    }

    async fn record_run(
        &self,
        id: &ScheduleId,
        next_run: DateTime<Utc>,
        ran_at: DateTime<Utc>,
    ) -> clarion_scheduler::Result<()> {
        record_run(self.pool(), id, next_run, ran_at)
            .await
            .map_err(|e| SchedulerError::Store(e.to_string()))
    }
}
