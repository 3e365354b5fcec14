//! `SQLite` implementation of the `TaskStore` trait.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

use vconv_core::{Job, JobStatus, ProgressPatch, StorageError, TaskStore};

use super::row_mappers::{map_column_error, row_to_job, to_db_time};

/// `SQLite` implementation of the `TaskStore` trait.
///
/// The `try_start` conditional update is the single path into `Converting`;
/// every other mutation is guarded so terminal rows stay immutable.
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    /// Create a new `SQLite` task repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: &str) -> Result<Option<Job>, StorageError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::storage)?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn apply_terminal(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        output_bytes: Option<u64>,
        now: &str,
    ) -> Result<u64, StorageError> {
        let progress_override: Option<i64> = (status == JobStatus::Completed).then_some(100);
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?,
                error_message = COALESCE(?, error_message),
                output_bytes = COALESCE(?, output_bytes),
                progress = COALESCE(?, progress),
                completed_at = ?
            WHERE id = ? AND status IN ('pending', 'converting')
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(output_bytes.map(|b| b as i64))
        .bind(progress_override)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::storage)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TaskStore for SqliteTaskRepository {
    async fn create(&self, job: &Job) -> Result<(), StorageError> {
        let overrides_json =
            serde_json::to_string(&job.overrides).map_err(StorageError::storage)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, name, input_path, output_path, input_bytes, output_bytes,
                preset_name, overrides, status, progress, duration_sec,
                current_sec, speed, eta_sec, error_message, created_at,
                started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(job.input_path.to_string_lossy().as_ref())
        .bind(job.output_path.to_string_lossy().as_ref())
        .bind(job.input_bytes as i64)
        .bind(job.output_bytes as i64)
        .bind(&job.preset_name)
        .bind(&overrides_json)
        .bind(job.status.as_str())
        .bind(i64::from(job.progress))
        .bind(job.duration_sec)
        .bind(job.current_sec)
        .bind(job.speed)
        .bind(job.eta_sec)
        .bind(job.error.as_deref())
        .bind(to_db_time(job.created_at))
        .bind(job.started_at.map(to_db_time))
        .bind(job.completed_at.map(to_db_time))
        .execute(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StorageError> {
        self.fetch(id).await
    }

    async fn list_active(&self) -> Result<Vec<Job>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE status IN ('pending', 'converting')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StorageError> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE status = ? ORDER BY created_at ASC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::storage)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn try_start(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'converting', started_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(to_db_time(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_progress(&self, id: &str, patch: &ProgressPatch) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress = ?,
                current_sec = COALESCE(?, current_sec),
                speed = COALESCE(?, speed),
                eta_sec = COALESCE(?, eta_sec),
                duration_sec = COALESCE(?, duration_sec)
            WHERE id = ? AND status IN ('pending', 'converting')
            "#,
        )
        .bind(i64::from(patch.progress.min(100)))
        .bind(patch.current_sec)
        .bind(patch.speed)
        .bind(patch.eta_sec)
        .bind(patch.duration_sec)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        Ok(())
    }

    async fn set_terminal(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        output_bytes: Option<u64>,
    ) -> Result<(), StorageError> {
        debug_assert!(status.is_terminal());
        let now = to_db_time(Utc::now());

        let affected = self
            .apply_terminal(id, status, error, output_bytes, &now)
            .await?;

        // Verify by re-read; retry once on mismatch. A row that was already
        // terminal before this call is a no-op (first writer wins).
        let current = self
            .fetch(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("job '{id}'")))?;
        if current.status == status || (affected == 0 && current.is_terminal()) {
            return Ok(());
        }

        tracing::warn!(
            job_id = %id,
            expected = status.as_str(),
            found = current.status.as_str(),
            "terminal write did not stick, retrying once"
        );
        self.apply_terminal(id, status, error, output_bytes, &now)
            .await?;

        let current = self
            .fetch(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("job '{id}'")))?;
        if current.status == status || current.is_terminal() {
            Ok(())
        } else {
            Err(StorageError::VerificationFailed {
                job_id: id.to_string(),
                expected: status.as_str().to_string(),
                found: current.status.as_str().to_string(),
            })
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::storage)?;
        Ok(())
    }

    async fn cleanup_older_than(
        &self,
        days: u32,
        statuses: &[JobStatus],
    ) -> Result<u64, StorageError> {
        let cutoff = to_db_time(Utc::now() - Duration::days(i64::from(days)));
        let mut removed = 0u64;
        for status in statuses {
            let result = sqlx::query("DELETE FROM jobs WHERE status = ? AND created_at < ?")
                .bind(status.as_str())
                .bind(&cutoff)
                .execute(&self.pool)
                .await
                .map_err(StorageError::storage)?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    async fn referenced_paths(&self) -> Result<HashSet<PathBuf>, StorageError> {
        let rows = sqlx::query(
            "SELECT input_path, output_path FROM jobs WHERE status IN ('pending', 'converting')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        let mut paths = HashSet::with_capacity(rows.len() * 2);
        for row in &rows {
            let input: String = row.try_get("input_path").map_err(map_column_error)?;
            let output: String = row.try_get("output_path").map_err(map_column_error)?;
            paths.insert(PathBuf::from(input));
            paths.insert(PathBuf::from(output));
        }
        Ok(paths)
    }

    async fn known_paths(&self) -> Result<HashSet<PathBuf>, StorageError> {
        let rows = sqlx::query("SELECT input_path, output_path FROM jobs")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::storage)?;

        let mut paths = HashSet::with_capacity(rows.len() * 2);
        for row in &rows {
            let input: String = row.try_get("input_path").map_err(map_column_error)?;
            let output: String = row.try_get("output_path").map_err(map_column_error)?;
            paths.insert(PathBuf::from(input));
            paths.insert(PathBuf::from(output));
        }
        Ok(paths)
    }

    async fn list_source_reclaim_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE status = 'completed'
              AND source_reclaimed = 0
              AND completed_at IS NOT NULL
              AND completed_at < ?
            ORDER BY completed_at ASC
            "#,
        )
        .bind(to_db_time(cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::storage)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn mark_source_reclaimed(&self, id: &str) -> Result<(), StorageError> {
        sqlx::query("UPDATE jobs SET source_reclaimed = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_test_database;
    use std::sync::Arc;
    use vconv_core::{ConversionOptions, NewJob};

    fn sample_job(name: &str) -> Job {
        Job::new(NewJob {
            name: name.into(),
            input_path: format!("/data/uploads/{name}.mov").into(),
            output_path: format!("/data/outputs/{name}.mp4").into(),
            input_bytes: 1024,
            preset_name: "Fast 1080p30".into(),
            overrides: ConversionOptions::default(),
        })
    }

    async fn repo() -> SqliteTaskRepository {
        SqliteTaskRepository::new(setup_test_database().await.unwrap())
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let repo = repo().await;
        let job = sample_job("clip");
        repo.create(&job).await.unwrap();

        let loaded = repo.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "clip");
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.input_bytes, 1024);
        assert_eq!(loaded.created_at, job.created_at);
    }

    #[tokio::test]
    async fn list_active_orders_by_creation() {
        let repo = repo().await;
        let mut first = sample_job("a");
        first.created_at = Utc::now() - Duration::minutes(5);
        let second = sample_job("b");
        repo.create(&second).await.unwrap();
        repo.create(&first).await.unwrap();

        let active = repo.list_active().await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].name, "a");
        assert_eq!(active[1].name, "b");
    }

    #[tokio::test]
    async fn try_start_claims_exactly_once() {
        let repo = repo().await;
        let job = sample_job("race");
        repo.create(&job).await.unwrap();

        assert!(repo.try_start(&job.id).await.unwrap());
        assert!(!repo.try_start(&job.id).await.unwrap());

        let loaded = repo.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Converting);
        assert!(loaded.started_at.is_some());
    }

    #[tokio::test]
    async fn concurrent_try_start_admits_one_winner() {
        let repo = Arc::new(repo().await);
        let job = sample_job("storm");
        repo.create(&job).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let repo = Arc::clone(&repo);
            let id = job.id.clone();
            handles.push(tokio::spawn(async move { repo.try_start(&id).await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn terminal_rows_are_immutable() {
        let repo = repo().await;
        let job = sample_job("done");
        repo.create(&job).await.unwrap();
        repo.try_start(&job.id).await.unwrap();
        repo.set_terminal(&job.id, JobStatus::Completed, None, Some(2048))
            .await
            .unwrap();

        // A later failure report must not overwrite the completed state.
        repo.set_terminal(&job.id, JobStatus::Failed, Some("late error"), None)
            .await
            .unwrap();
        repo.update_progress(
            &job.id,
            &ProgressPatch {
                progress: 10,
                ..ProgressPatch::default()
            },
        )
        .await
        .unwrap();

        let loaded = repo.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.progress, 100);
        assert_eq!(loaded.output_bytes, 2048);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn set_terminal_on_missing_job_reports_not_found() {
        let repo = repo().await;
        let err = repo
            .set_terminal("nope", JobStatus::Failed, Some("boom"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn referenced_paths_covers_only_non_terminal_jobs() {
        let repo = repo().await;
        let live = sample_job("live");
        let done = sample_job("done");
        repo.create(&live).await.unwrap();
        repo.create(&done).await.unwrap();
        repo.try_start(&done.id).await.unwrap();
        repo.set_terminal(&done.id, JobStatus::Completed, None, Some(1))
            .await
            .unwrap();

        let paths = repo.referenced_paths().await.unwrap();
        assert!(paths.contains(&live.input_path));
        assert!(paths.contains(&live.output_path));
        assert!(!paths.contains(&done.input_path));
    }

    #[tokio::test]
    async fn source_reclaim_candidates_are_completed_and_unreclaimed() {
        let repo = repo().await;
        let job = sample_job("reclaim");
        repo.create(&job).await.unwrap();
        repo.try_start(&job.id).await.unwrap();
        repo.set_terminal(&job.id, JobStatus::Completed, None, Some(1))
            .await
            .unwrap();

        let cutoff = Utc::now() + Duration::minutes(1);
        let candidates = repo.list_source_reclaim_candidates(cutoff).await.unwrap();
        assert_eq!(candidates.len(), 1);

        repo.mark_source_reclaimed(&job.id).await.unwrap();
        let candidates = repo.list_source_reclaim_candidates(cutoff).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn cleanup_older_than_respects_status_filter() {
        let repo = repo().await;
        let mut old_failed = sample_job("old");
        old_failed.created_at = Utc::now() - Duration::days(10);
        repo.create(&old_failed).await.unwrap();
        repo.try_start(&old_failed.id).await.unwrap();
        repo.set_terminal(&old_failed.id, JobStatus::Failed, Some("x"), None)
            .await
            .unwrap();

        let fresh = sample_job("fresh");
        repo.create(&fresh).await.unwrap();

        let removed = repo
            .cleanup_older_than(7, &JobStatus::terminal_statuses())
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get(&fresh.id).await.unwrap().is_some());
    }
}
