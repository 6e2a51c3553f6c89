//! Crawl job records and their guarded status transitions.
//!
//! Every status write is a compare-and-set: the `UPDATE` names the statuses
//! it may move from and reports whether a row matched.

use crate::error::{DatabaseError, Result};
use crate::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use clarion_core::{AuditStandard, CrawlBounds, ImpactCounts, JobId, JobStatus, ScheduleId};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};

const JOB_COLUMNS: &str = "id, root_url, depth_limit, page_limit, crawl_rate, wcag_version, \
    conformance_level, pages_scanned, violations_found, critical_count, serious_count, \
    moderate_count, minor_count, accessibility_score, status, error_message, schedule_id, \
    created_at, started_at, completed_at, updated_at";

/// One audit run over a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    /// Unique identifier
    pub id: JobId,
    /// Root URL the crawl starts from
    pub root_url: String,
    /// Depth, page and rate limits
    pub bounds: CrawlBounds,
    /// Standard the pages are audited against
    pub standard: AuditStandard,
    /// Pages recorded so far (never exceeds `bounds.page_limit`)
    pub pages_scanned: u32,
    /// Affected nodes across all recorded pages
    pub violations_found: u64,
    /// Affected nodes per impact level
    pub violations_by_impact: ImpactCounts,
    /// Running average of page scores, 0-100
    pub accessibility_score: f64,
    /// Lifecycle status
    pub status: JobStatus,
    /// Reason the job failed
    pub error_message: Option<String>,
    /// Schedule this job was materialized from
    pub schedule_id: Option<ScheduleId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// When a crawl engine picked the job up
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Last write to the record; stuck detection reads this
    pub updated_at: DateTime<Utc>,
}

/// Parameters for a new pending job.
#[derive(Debug, Clone)]
pub struct NewCrawlJob {
    /// Root URL the crawl starts from
    pub root_url: String,
    /// Depth, page and rate limits
    pub bounds: CrawlBounds,
    /// Standard the pages are audited against
    pub standard: AuditStandard,
    /// Schedule the job comes from, if any
    pub schedule_id: Option<ScheduleId>,
}

/// Job counters after a page was recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageTotals {
    /// Pages recorded including this one
    pub pages_scanned: u32,
    /// Updated running average
    pub accessibility_score: f64,
}

fn decode_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| DatabaseError::Decode(format!("{column} out of range: {value}")))
}

fn decode_u64(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| DatabaseError::Decode(format!("{column} out of range: {value}")))
}

fn decode<T>(value: &str, column: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| DatabaseError::Decode(format!("invalid {column} '{value}': {e}")))
}

fn job_from_row(row: &SqliteRow) -> Result<CrawlJob> {
    let id: String = row.try_get("id")?;
    let wcag_version: String = row.try_get("wcag_version")?;
    let conformance_level: String = row.try_get("conformance_level")?;
    let status: String = row.try_get("status")?;
    let schedule_id: Option<String> = row.try_get("schedule_id")?;
    let created_at: String = row.try_get("created_at")?;
    let started_at: Option<String> = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(CrawlJob {
        id: decode(&id, "job id")?,
        root_url: row.try_get("root_url")?,
        bounds: CrawlBounds {
            depth_limit: decode_u32(row.try_get("depth_limit")?, "depth_limit")?,
            page_limit: decode_u32(row.try_get("page_limit")?, "page_limit")?,
            crawl_rate: decode_u32(row.try_get("crawl_rate")?, "crawl_rate")?,
        },
        standard: AuditStandard {
            version: decode(&wcag_version, "wcag_version")?,
            level: decode(&conformance_level, "conformance_level")?,
        },
        pages_scanned: decode_u32(row.try_get("pages_scanned")?, "pages_scanned")?,
        violations_found: decode_u64(row.try_get("violations_found")?, "violations_found")?,
        violations_by_impact: ImpactCounts {
            critical: decode_u64(row.try_get("critical_count")?, "critical_count")?,
            serious: decode_u64(row.try_get("serious_count")?, "serious_count")?,
            moderate: decode_u64(row.try_get("moderate_count")?, "moderate_count")?,
            minor: decode_u64(row.try_get("minor_count")?, "minor_count")?,
        },
        accessibility_score: row.try_get("accessibility_score")?,
        status: decode(&status, "status")?,
        error_message: row.try_get("error_message")?,
        schedule_id: schedule_id
            .as_deref()
            .map(|s| decode(s, "schedule_id"))
            .transpose()?,
        created_at: parse_timestamp(&created_at)?,
        started_at: parse_optional_timestamp(started_at.as_deref())?,
        completed_at: parse_optional_timestamp(completed_at.as_deref())?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Insert a new job in `pending` status.
///
/// # Errors
/// Returns `DatabaseError` if the bounds are out of range or the insert fails.
pub async fn create(pool: &SqlitePool, new: NewCrawlJob) -> Result<CrawlJob> {
    new.bounds
        .validate()
        .map_err(|e| DatabaseError::Invalid(e.to_string()))?;

    let now = Utc::now();
    let job = CrawlJob {
        id: JobId::generate(),
        root_url: new.root_url,
        bounds: new.bounds,
        standard: new.standard,
        pages_scanned: 0,
        violations_found: 0,
        violations_by_impact: ImpactCounts::default(),
        accessibility_score: 0.0,
        status: JobStatus::Pending,
        error_message: None,
        schedule_id: new.schedule_id,
        created_at: now,
        started_at: None,
        completed_at: None,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO crawl_jobs (id, root_url, depth_limit, page_limit, crawl_rate, wcag_version,
             conformance_level, status, schedule_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(job.id.to_string())
    .bind(&job.root_url)
    .bind(i64::from(job.bounds.depth_limit))
    .bind(i64::from(job.bounds.page_limit))
    .bind(i64::from(job.bounds.crawl_rate))
    .bind(job.standard.version.as_str())
    .bind(job.standard.level.as_str())
    .bind(job.status.as_str())
    .bind(job.schedule_id.map(|id| id.to_string()))
    .bind(format_timestamp(now))
    .bind(format_timestamp(now))
    .execute(pool)
    .await?;

    tracing::debug!(job_id = %job.id, "Created crawl job for {}", job.root_url);
    Ok(job)
}

/// Fetch a job, `None` if it does not exist.
pub async fn find<'e, E>(executor: E, id: &JobId) -> Result<Option<CrawlJob>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Fetch a job.
///
/// # Errors
/// Returns `DatabaseError::NotFound` if no job has this id.
pub async fn get(pool: &SqlitePool, id: &JobId) -> Result<CrawlJob> {
    find(pool, id).await?.ok_or_else(|| {
        DatabaseError::NotFound(format!("crawl job '{id}' not found"))
    })
}

/// All jobs, newest first, optionally restricted to one status.
pub async fn list(pool: &SqlitePool, status: Option<JobStatus>) -> Result<Vec<CrawlJob>> {
    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                "SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE status = ? ORDER BY created_at DESC"
            ))
            .bind(status.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {JOB_COLUMNS} FROM crawl_jobs ORDER BY created_at DESC"
            ))
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(job_from_row).collect()
}

async fn update_status<'e, E>(
    executor: E,
    id: &JobId,
    from: &[JobStatus],
    to: JobStatus,
    error_message: Option<&str>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    if from.is_empty() {
        return Ok(false);
    }

    let now = format_timestamp(Utc::now());
    let started_at = (to == JobStatus::InProgress).then(|| now.clone());
    let completed_at = to.is_terminal().then(|| now.clone());
    let placeholders = vec!["?"; from.len()].join(", ");

    let sql = format!(
        "UPDATE crawl_jobs
         SET status = ?,
             started_at = COALESCE(?, started_at),
             completed_at = COALESCE(?, completed_at),
             error_message = COALESCE(?, error_message),
             updated_at = ?
         WHERE id = ? AND status IN ({placeholders})"
    );

    let mut query = sqlx::query(&sql)
        .bind(to.as_str())
        .bind(started_at)
        .bind(completed_at)
        .bind(error_message)
        .bind(now)
        .bind(id.to_string());
    for status in from {
        query = query.bind(status.as_str());
    }

    let result = query.execute(executor).await?;
    Ok(result.rows_affected() > 0)
}

/// Compare-and-set the status from any of `from` to `to`.
///
/// Moving to `in_progress` stamps `started_at`; moving to a terminal status
/// stamps `completed_at`. Returns whether the job was in one of `from`.
pub async fn transition<'e, E>(
    executor: E,
    id: &JobId,
    from: &[JobStatus],
    to: JobStatus,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    update_status(executor, id, from, to, None).await
}

/// Compare-and-set the status from any of `from` to `failed`, recording why.
pub async fn fail<'e, E>(
    executor: E,
    id: &JobId,
    from: &[JobStatus],
    message: &str,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    update_status(executor, id, from, JobStatus::Failed, Some(message)).await
}

/// Number of jobs currently in `status`.
pub async fn count_with_status(pool: &SqlitePool, status: JobStatus) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM crawl_jobs WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Jobs `in_progress` whose last update is older than `cutoff`.
pub async fn stale_in_progress(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<Vec<JobId>> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT id FROM crawl_jobs
         WHERE status = 'in_progress' AND updated_at < ?
         ORDER BY updated_at",
    )
    .bind(format_timestamp(cutoff))
    .fetch_all(pool)
    .await?;

    ids.iter().map(|id| decode(id, "job id")).collect()
}

/// Bump `updated_at` of a running job without changing its counters.
pub async fn touch(pool: &SqlitePool, id: &JobId) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE crawl_jobs SET updated_at = ? WHERE id = ? AND status = 'in_progress'",
    )
    .bind(format_timestamp(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Fold one page into the job's counters with a single guarded `UPDATE`.
///
/// The guard requires the job to be `in_progress` with room under its page
/// limit; `None` means the guard rejected the page and nothing changed.
pub async fn apply_page<'e, E>(
    executor: E,
    id: &JobId,
    page_score: f64,
    counts: &ImpactCounts,
) -> Result<Option<PageTotals>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let to_i64 = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);

    let row = sqlx::query(
        "UPDATE crawl_jobs
         SET accessibility_score = (accessibility_score * pages_scanned + ?) / (pages_scanned + 1),
             pages_scanned = pages_scanned + 1,
             violations_found = violations_found + ?,
             critical_count = critical_count + ?,
             serious_count = serious_count + ?,
             moderate_count = moderate_count + ?,
             minor_count = minor_count + ?,
             updated_at = ?
         WHERE id = ? AND status = 'in_progress' AND pages_scanned < page_limit
         RETURNING pages_scanned, accessibility_score",
    )
    .bind(page_score)
    .bind(to_i64(counts.total()))
    .bind(to_i64(counts.critical))
    .bind(to_i64(counts.serious))
    .bind(to_i64(counts.moderate))
    .bind(to_i64(counts.minor))
    .bind(format_timestamp(Utc::now()))
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;

    row.map(|row| {
        Ok(PageTotals {
            pages_scanned: decode_u32(row.try_get("pages_scanned")?, "pages_scanned")?,
            accessibility_score: row.try_get("accessibility_score")?,
        })
    })
    .transpose()
}
