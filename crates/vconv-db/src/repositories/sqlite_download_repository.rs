//! `SQLite` implementation of the `DownloadStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use sqlx::sqlite::SqliteRow;

use vconv_core::{DownloadRecord, DownloadStore, StorageError};

use super::row_mappers::{map_column_error, parse_db_time, to_db_time};

/// `SQLite` implementation of the `DownloadStore` trait.
///
/// The persistent `scheduled_delete_at` column is the source of truth for
/// retention; in-memory timers are only an optimization on top of it.
pub struct SqliteDownloadRepository {
    pool: SqlitePool,
}

impl SqliteDownloadRepository {
    /// Create a new `SQLite` download repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &SqliteRow) -> Result<DownloadRecord, StorageError> {
    let id: String = row.try_get("id").map_err(map_column_error)?;
    let job_id: String = row.try_get("job_id").map_err(map_column_error)?;
    let file_name: String = row.try_get("file_name").map_err(map_column_error)?;
    let file_bytes: i64 = row.try_get("file_bytes").map_err(map_column_error)?;
    let downloaded_at: String = row.try_get("downloaded_at").map_err(map_column_error)?;
    let scheduled_delete_at: String = row
        .try_get("scheduled_delete_at")
        .map_err(map_column_error)?;
    let deleted_at: Option<String> = row.try_get("deleted_at").map_err(map_column_error)?;
    let client_addr: Option<String> = row.try_get("client_addr").map_err(map_column_error)?;
    let user_agent: Option<String> = row.try_get("user_agent").map_err(map_column_error)?;

    Ok(DownloadRecord {
        id,
        job_id,
        file_name,
        file_bytes: file_bytes.max(0) as u64,
        downloaded_at: parse_db_time(&downloaded_at)?,
        scheduled_delete_at: parse_db_time(&scheduled_delete_at)?,
        deleted_at: deleted_at.as_deref().map(parse_db_time).transpose()?,
        client_addr,
        user_agent,
    })
}

#[async_trait]
impl DownloadStore for SqliteDownloadRepository {
    async fn insert(&self, record: &DownloadRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO download_records (
                id, job_id, file_name, file_bytes, downloaded_at,
                scheduled_delete_at, deleted_at, client_addr, user_agent
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.job_id)
        .bind(&record.file_name)
        .bind(record.file_bytes as i64)
        .bind(to_db_time(record.downloaded_at))
        .bind(to_db_time(record.scheduled_delete_at))
        .bind(record.deleted_at.map(to_db_time))
        .bind(record.client_addr.as_deref())
        .bind(record.user_agent.as_deref())
        .execute(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DownloadRecord>, StorageError> {
        let row = sqlx::query("SELECT * FROM download_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::storage)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_for_job(&self, job_id: &str) -> Result<Vec<DownloadRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM download_records WHERE job_id = ? ORDER BY downloaded_at DESC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn list_pending_cleanup(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DownloadRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM download_records
            WHERE deleted_at IS NULL AND scheduled_delete_at <= ?
            ORDER BY scheduled_delete_at ASC
            "#,
        )
        .bind(to_db_time(now))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn list_downloaded_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DownloadRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM download_records
            WHERE deleted_at IS NULL AND downloaded_at < ?
            ORDER BY downloaded_at ASC
            "#,
        )
        .bind(to_db_time(cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn mark_deleted(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE download_records SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(to_db_time(at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn prune_deleted_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM download_records WHERE deleted_at IS NOT NULL AND deleted_at < ?",
        )
        .bind(to_db_time(cutoff))
        .execute(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_test_database;
    use chrono::Duration;

    async fn repo() -> SqliteDownloadRepository {
        SqliteDownloadRepository::new(setup_test_database().await.unwrap())
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let repo = repo().await;
        let record = DownloadRecord::new("job-1", "out.mp4", 2048, Duration::hours(24))
            .with_client(Some("10.0.0.5".into()), Some("curl/8".into()));
        repo.insert(&record).await.unwrap();

        let loaded = repo.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.job_id, "job-1");
        assert_eq!(loaded.file_bytes, 2048);
        assert_eq!(loaded.client_addr.as_deref(), Some("10.0.0.5"));
        assert!(loaded.deleted_at.is_none());
    }

    #[tokio::test]
    async fn pending_cleanup_excludes_future_and_deleted() {
        let repo = repo().await;
        let due = DownloadRecord::new("job-1", "a.mp4", 1, Duration::seconds(-5));
        let future = DownloadRecord::new("job-1", "b.mp4", 1, Duration::hours(1));
        let mut done = DownloadRecord::new("job-1", "c.mp4", 1, Duration::seconds(-5));
        done.deleted_at = Some(Utc::now());
        repo.insert(&due).await.unwrap();
        repo.insert(&future).await.unwrap();
        repo.insert(&done).await.unwrap();

        let pending = repo.list_pending_cleanup(Utc::now()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, due.id);
    }

    #[tokio::test]
    async fn mark_deleted_is_single_shot() {
        let repo = repo().await;
        let record = DownloadRecord::new("job-1", "a.mp4", 1, Duration::seconds(0));
        repo.insert(&record).await.unwrap();

        assert!(repo.mark_deleted(&record.id, Utc::now()).await.unwrap());
        assert!(!repo.mark_deleted(&record.id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn multiple_records_per_job_are_kept() {
        let repo = repo().await;
        for _ in 0..3 {
            let record = DownloadRecord::new("job-9", "out.mp4", 7, Duration::hours(1));
            repo.insert(&record).await.unwrap();
        }
        let records = repo.list_for_job("job-9").await.unwrap();
        assert_eq!(records.len(), 3);
    }
}
