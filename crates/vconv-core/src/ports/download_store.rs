//! Download record store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::StorageError;
use crate::domain::DownloadRecord;

/// Persistence for download tracking and retention schedules.
#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// Insert a new download record.
    async fn insert(&self, record: &DownloadRecord) -> Result<(), StorageError>;

    /// Fetch one record by id.
    async fn get(&self, id: &str) -> Result<Option<DownloadRecord>, StorageError>;

    /// All records for one job, newest first.
    async fn list_for_job(&self, job_id: &str) -> Result<Vec<DownloadRecord>, StorageError>;

    /// Records whose scheduled delete time has elapsed and that have not been
    /// cleaned up yet.
    async fn list_pending_cleanup(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DownloadRecord>, StorageError>;

    /// Uncleaned records downloaded before `cutoff`, regardless of their
    /// scheduled delete time. Aggressive and emergency cleanup use this to
    /// shorten the retention window.
    async fn list_downloaded_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DownloadRecord>, StorageError>;

    /// Mark a record's cleanup as performed.
    ///
    /// Returns true iff the record was still unmarked (guards double
    /// deletion when sweeps overlap).
    async fn mark_deleted(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StorageError>;

    /// Delete records cleaned up before `cutoff`. Returns the rows removed.
    async fn prune_deleted_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;
}
