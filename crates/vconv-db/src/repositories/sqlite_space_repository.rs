//! `SQLite` implementations of the `SpaceStore` and `BatchStore` traits.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use vconv_core::{
    Batch, BatchStatus, BatchStore, SpaceQuota, SpaceStore, SpaceUsage, StorageError,
};

use super::row_mappers::{map_column_error, parse_db_time, to_db_time};

/// `SQLite` store for the quota and usage singletons.
///
/// Both tables hold exactly one row (`id = 1`); reads lazily insert the
/// default so callers never observe a missing singleton.
pub struct SqliteSpaceRepository {
    pool: SqlitePool,
}

impl SqliteSpaceRepository {
    /// Create a new `SQLite` space repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SpaceStore for SqliteSpaceRepository {
    async fn quota(&self) -> Result<SpaceQuota, StorageError> {
        let row = sqlx::query("SELECT * FROM space_quota WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::storage)?;

        match row {
            Some(row) => {
                let max_total_bytes: i64 =
                    row.try_get("max_total_bytes").map_err(map_column_error)?;
                let reserved_bytes: i64 =
                    row.try_get("reserved_bytes").map_err(map_column_error)?;
                let enabled: i64 = row.try_get("enabled").map_err(map_column_error)?;
                let updated_at: String = row.try_get("updated_at").map_err(map_column_error)?;
                Ok(SpaceQuota {
                    max_total_bytes: max_total_bytes.max(0) as u64,
                    reserved_bytes: reserved_bytes.max(0) as u64,
                    enabled: enabled != 0,
                    updated_at: parse_db_time(&updated_at)?,
                })
            }
            None => {
                let quota = SpaceQuota::default();
                self.set_quota(&quota).await?;
                Ok(quota)
            }
        }
    }

    async fn set_quota(&self, quota: &SpaceQuota) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO space_quota (id, max_total_bytes, reserved_bytes, enabled, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                max_total_bytes = excluded.max_total_bytes,
                reserved_bytes = excluded.reserved_bytes,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(quota.max_total_bytes as i64)
        .bind(quota.reserved_bytes as i64)
        .bind(i64::from(quota.enabled))
        .bind(to_db_time(quota.updated_at))
        .execute(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        Ok(())
    }

    async fn usage(&self) -> Result<SpaceUsage, StorageError> {
        let row = sqlx::query("SELECT * FROM space_usage WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::storage)?;

        match row {
            Some(row) => {
                let uploads_bytes: i64 = row.try_get("uploads_bytes").map_err(map_column_error)?;
                let outputs_bytes: i64 = row.try_get("outputs_bytes").map_err(map_column_error)?;
                let temp_bytes: i64 = row.try_get("temp_bytes").map_err(map_column_error)?;
                let last_measured_at: String =
                    row.try_get("last_measured_at").map_err(map_column_error)?;
                Ok(SpaceUsage {
                    uploads_bytes: uploads_bytes.max(0) as u64,
                    outputs_bytes: outputs_bytes.max(0) as u64,
                    temp_bytes: temp_bytes.max(0) as u64,
                    last_measured_at: parse_db_time(&last_measured_at)?,
                })
            }
            None => {
                let usage = SpaceUsage::default();
                self.set_usage(&usage).await?;
                Ok(usage)
            }
        }
    }

    async fn set_usage(&self, usage: &SpaceUsage) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO space_usage (id, uploads_bytes, outputs_bytes, temp_bytes, last_measured_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                uploads_bytes = excluded.uploads_bytes,
                outputs_bytes = excluded.outputs_bytes,
                temp_bytes = excluded.temp_bytes,
                last_measured_at = excluded.last_measured_at
            "#,
        )
        .bind(usage.uploads_bytes as i64)
        .bind(usage.outputs_bytes as i64)
        .bind(usage.temp_bytes as i64)
        .bind(to_db_time(usage.last_measured_at))
        .execute(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        Ok(())
    }
}

/// `SQLite` store for batch grouping.
pub struct SqliteBatchRepository {
    pool: SqlitePool,
}

impl SqliteBatchRepository {
    /// Create a new `SQLite` batch repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn member_ids(&self, batch_id: &str) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT job_id FROM batch_jobs WHERE batch_id = ?")
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::storage)?;
        rows.iter()
            .map(|row| row.try_get("job_id").map_err(map_column_error))
            .collect()
    }

    async fn fetch(&self, id: &str) -> Result<Option<Batch>, StorageError> {
        let row = sqlx::query("SELECT * FROM batches WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::storage)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status").map_err(map_column_error)?;
        let total_jobs: i64 = row.try_get("total_jobs").map_err(map_column_error)?;
        let completed_jobs: i64 = row.try_get("completed_jobs").map_err(map_column_error)?;
        let estimated_bytes: i64 = row.try_get("estimated_bytes").map_err(map_column_error)?;
        let created_at: String = row.try_get("created_at").map_err(map_column_error)?;

        Ok(Some(Batch {
            id: id.to_string(),
            job_ids: self.member_ids(id).await?,
            status: BatchStatus::parse(&status),
            total_jobs: total_jobs.max(0) as u32,
            completed_jobs: completed_jobs.max(0) as u32,
            estimated_bytes: estimated_bytes.max(0) as u64,
            created_at: parse_db_time(&created_at)?,
        }))
    }
}

#[async_trait]
impl BatchStore for SqliteBatchRepository {
    async fn create(&self, batch: &Batch) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO batches (id, status, total_jobs, completed_jobs, estimated_bytes, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&batch.id)
        .bind(batch.status.as_str())
        .bind(i64::from(batch.total_jobs))
        .bind(i64::from(batch.completed_jobs))
        .bind(batch.estimated_bytes as i64)
        .bind(to_db_time(batch.created_at))
        .execute(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        for job_id in &batch.job_ids {
            sqlx::query("INSERT OR IGNORE INTO batch_jobs (batch_id, job_id) VALUES (?, ?)")
                .bind(&batch.id)
                .bind(job_id)
                .execute(&self.pool)
                .await
                .map_err(StorageError::storage)?;
        }

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Batch>, StorageError> {
        self.fetch(id).await
    }

    async fn batch_for_job(&self, job_id: &str) -> Result<Option<Batch>, StorageError> {
        let row = sqlx::query("SELECT batch_id FROM batch_jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::storage)?;

        match row {
            Some(row) => {
                let batch_id: String = row.try_get("batch_id").map_err(map_column_error)?;
                self.fetch(&batch_id).await
            }
            None => Ok(None),
        }
    }

    async fn record_member_terminal(&self, job_id: &str) -> Result<Option<Batch>, StorageError> {
        let Some(batch) = self.batch_for_job(job_id).await? else {
            return Ok(None);
        };

        // Clamp at total_jobs; flip an exhausted Active batch to Completed
        // in the same statement so concurrent member completions converge.
        sqlx::query(
            r#"
            UPDATE batches
            SET completed_jobs = MIN(completed_jobs + 1, total_jobs),
                status = CASE
                    WHEN completed_jobs + 1 >= total_jobs AND status = 'active'
                    THEN 'completed' ELSE status
                END
            WHERE id = ?
            "#,
        )
        .bind(&batch.id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        self.fetch(&batch.id).await
    }

    async fn set_status(&self, id: &str, status: BatchStatus) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE batches SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::storage)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("batch '{id}'")));
        }
        Ok(())
    }
}
