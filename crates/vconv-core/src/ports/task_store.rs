//! Task store trait definition.
//!
//! Every job mutation in the system goes through this port; in particular,
//! [`TaskStore::try_start`] is the single serialization point that prevents
//! two workers from running the same job.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::StorageError;
use crate::domain::{Job, JobStatus, ProgressPatch};

/// Durable job records and atomic state transitions.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new job (status must be `Pending`).
    async fn create(&self, job: &Job) -> Result<(), StorageError>;

    /// Fetch one job by id.
    async fn get(&self, id: &str) -> Result<Option<Job>, StorageError>;

    /// Jobs in `Pending` or `Converting`, oldest first, read fresh from the
    /// store (no stale cache).
    async fn list_active(&self) -> Result<Vec<Job>, StorageError>;

    /// All jobs with the given status.
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StorageError>;

    /// Atomically promote `Pending -> Converting`, setting `started_at`.
    ///
    /// Returns true iff this call claimed the row; false when the job is
    /// missing or not `Pending`.
    async fn try_start(&self, id: &str) -> Result<bool, StorageError>;

    /// Partial progress update; never changes status and is ignored for
    /// terminal rows.
    async fn update_progress(&self, id: &str, patch: &ProgressPatch) -> Result<(), StorageError>;

    /// Move a job to a terminal status, setting `completed_at`.
    ///
    /// Completion carries the verified output size and forces progress to
    /// 100. A row that is already terminal is left untouched (first writer
    /// wins). The write is verified by re-read and retried once before an
    /// error is reported.
    async fn set_terminal(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        output_bytes: Option<u64>,
    ) -> Result<(), StorageError>;

    /// Delete one job row.
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// Delete jobs in the given statuses whose `created_at` is older than
    /// `days` days. Returns the number of rows removed.
    async fn cleanup_older_than(
        &self,
        days: u32,
        statuses: &[JobStatus],
    ) -> Result<u64, StorageError>;

    /// Input and output paths of every non-terminal job.
    ///
    /// Cleanup consults this set so it never deletes a file a live job still
    /// references.
    async fn referenced_paths(&self) -> Result<HashSet<PathBuf>, StorageError>;

    /// Input and output paths of every job row, terminal or not.
    ///
    /// Orphan detection treats anything outside this set as unowned.
    async fn known_paths(&self) -> Result<HashSet<PathBuf>, StorageError>;

    /// Completed jobs finished before `cutoff` whose source file has not yet
    /// been reclaimed.
    async fn list_source_reclaim_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, StorageError>;

    /// Record that a completed job's source file was reclaimed, so the
    /// cleanup category is idempotent.
    async fn mark_source_reclaimed(&self, id: &str) -> Result<(), StorageError>;
}
