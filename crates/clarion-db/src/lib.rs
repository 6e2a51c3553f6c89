//! Clarion Database Layer
//!
//! `SQLite` persistence for crawl jobs, backlog entries, violation records and
//! schedule definitions, using `SQLx` with embedded migrations.
//!
//! # Example
//!
//! ```ignore
//! use clarion_db::Database;
//!
//! let db = Database::new("clarion.db", 5).await?;
//! db.run_migrations().await?;
//! ```
//!
//! # Conventions
//!
//! - Timestamps are stored as fixed-width RFC 3339 UTC strings so that text
//!   comparison in SQL orders them chronologically
//! - Functions that take part in multi-statement transactions accept any
//!   `sqlx::Executor`, so callers can pass `&mut *tx` or the pool
//! - Status changes are compare-and-set updates that report whether they applied

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
/// Crawl job records and guarded status transitions.
pub mod crawl_jobs;
pub mod error;
pub mod migrations;
pub mod queue_entries;
pub mod schedules;
pub mod violations;

// Re-export commonly used types
pub use connection::ConnectionPool;
pub use crawl_jobs::{CrawlJob, NewCrawlJob, PageTotals};
pub use error::{DatabaseError, Result};
pub use queue_entries::QueueEntry;
pub use violations::ViolationRecord;

use chrono::{DateTime, SecondsFormat, Utc};
use clarion_core::DatabaseConfig;
use sqlx::{Sqlite, Transaction};
use std::path::Path;

/// Format a timestamp the way every table stores it.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{value}': {e}")))
}

pub(crate) fn parse_optional_timestamp(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(parse_timestamp).transpose()
}

/// High-level database handle.
///
/// Cloning is cheap; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Open the database at `path` (or `:memory:`).
    ///
    /// # Errors
    /// Returns `DatabaseError::Open` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let pool = ConnectionPool::new(path, max_connections).await?;
        Ok(Self { pool })
    }

    /// Open the database described by the `[database]` config section.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::new(&config.path, config.max_connections).await
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(self.pool.pool()).await
    }

    /// Highest applied migration version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(self.pool.pool()).await
    }

    /// Get a reference to the underlying connection pool.
    ///
    /// This allows direct access to the `SQLx` pool for custom queries and
    /// transactions.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.pool.pool()
    }

    /// Begin a transaction that takes the write lock up front.
    ///
    /// In WAL mode a deferred transaction that reads first fails with
    /// `SQLITE_BUSY` instead of waiting if another connection commits before
    /// its first write. Every read-then-write transaction goes through here.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.pool().begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
