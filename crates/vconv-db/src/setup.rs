//! Database setup and initialization.
//!
//! This module provides the `setup_database()` function for initializing
//! the `SQLite` database with the full schema. Entry points call this with
//! the resolved database path.

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqliteConnectOptions};
use std::path::Path;

/// Sets up the `SQLite` database connection and ensures the schema exists.
///
/// Creates the database file (and its parent directory) if missing, then
/// creates all tables and indexes. Safe to call on every startup.
///
/// # Errors
///
/// Returns an error if the database file cannot be opened or created, or if
/// schema creation fails.
pub async fn setup_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true),
    )
    .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Sets up an in-memory `SQLite` database for testing.
///
/// Creates a fresh in-memory database with the full production schema. The
/// pool is pinned to a single connection: every pooled connection to
/// `:memory:` would otherwise see its own empty database.
#[cfg(any(test, feature = "test-utils"))]
pub async fn setup_test_database() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Creates the complete database schema.
///
/// Safe to call multiple times as all operations use IF NOT EXISTS.
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Transcode jobs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            input_path TEXT NOT NULL,
            output_path TEXT NOT NULL,
            input_bytes INTEGER NOT NULL DEFAULT 0,
            output_bytes INTEGER NOT NULL DEFAULT 0,
            preset_name TEXT NOT NULL,
            overrides TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending',
            progress INTEGER NOT NULL DEFAULT 0,
            duration_sec REAL,
            current_sec REAL,
            speed REAL,
            eta_sec REAL,
            error_message TEXT,
            source_reclaimed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Index for the dispatcher's active-jobs poll
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at)")
        .execute(pool)
        .await?;

    // Download tracking for output retention
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS download_records (
            id TEXT PRIMARY KEY NOT NULL,
            job_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_bytes INTEGER NOT NULL DEFAULT 0,
            downloaded_at TEXT NOT NULL,
            scheduled_delete_at TEXT NOT NULL,
            deleted_at TEXT,
            client_addr TEXT,
            user_agent TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_job ON download_records(job_id)")
        .execute(pool)
        .await?;

    // Index for the retention sweeper's due-records scan
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_downloads_pending \
         ON download_records(deleted_at, scheduled_delete_at)",
    )
    .execute(pool)
    .await?;

    // Space accounting singletons (fixed id = 1)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS space_quota (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            max_total_bytes INTEGER NOT NULL,
            reserved_bytes INTEGER NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS space_usage (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            uploads_bytes INTEGER NOT NULL DEFAULT 0,
            outputs_bytes INTEGER NOT NULL DEFAULT 0,
            temp_bytes INTEGER NOT NULL DEFAULT 0,
            last_measured_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Batch grouping
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            id TEXT PRIMARY KEY NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            total_jobs INTEGER NOT NULL DEFAULT 0,
            completed_jobs INTEGER NOT NULL DEFAULT 0,
            estimated_bytes INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_jobs (
            batch_id TEXT NOT NULL,
            job_id TEXT NOT NULL,
            UNIQUE(batch_id, job_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_batch_jobs_job ON batch_jobs(job_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_setup_test_database() {
        let pool = setup_test_database().await.unwrap();

        // Verify tables exist by querying them
        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
            .fetch_one(&pool)
            .await
            .unwrap();

        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM download_records")
            .fetch_one(&pool)
            .await
            .unwrap();

        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM batches")
            .fetch_one(&pool)
            .await
            .unwrap();
    }
}
