//! Embedded schema migrations.

use crate::error::{DatabaseError, Result};
use sqlx::migrate::Migrator;
use sqlx::{Pool, Sqlite};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Newest migration compiled into this binary.
#[must_use]
pub fn latest_version() -> i64 {
    MIGRATOR.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Apply every migration the database has not seen yet.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    let before = get_schema_version(pool).await?;

    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;

    let after = latest_version();
    if after > before {
        tracing::info!("Migrated schema from version {} to {}", before, after);
    } else {
        tracing::debug!("Schema already at version {}", before);
    }
    Ok(())
}

/// Highest successfully applied migration, 0 on a fresh database.
pub async fn get_schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let applied: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1",
    )
    .fetch_one(pool)
    .await
    .or_else(|e| match e {
        sqlx::Error::Database(db) if db.message().contains("no such table") => Ok(None),
        other => Err(other),
    })?;

    Ok(applied.unwrap_or(0))
}
