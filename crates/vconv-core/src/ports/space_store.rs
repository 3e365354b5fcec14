//! Space accounting and batch store trait definitions.

use async_trait::async_trait;

use super::StorageError;
use crate::domain::{Batch, BatchStatus, SpaceQuota, SpaceUsage};

/// Persistence for the quota and usage singletons.
#[async_trait]
pub trait SpaceStore: Send + Sync {
    /// Load the quota configuration, creating the default row if absent.
    async fn quota(&self) -> Result<SpaceQuota, StorageError>;

    /// Replace the quota configuration.
    async fn set_quota(&self, quota: &SpaceQuota) -> Result<(), StorageError>;

    /// Load the last persisted usage measurement, creating a zero row if
    /// absent.
    async fn usage(&self) -> Result<SpaceUsage, StorageError>;

    /// Persist a usage measurement.
    async fn set_usage(&self, usage: &SpaceUsage) -> Result<(), StorageError>;
}

/// Persistence for batch grouping.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Insert a batch and its membership rows.
    async fn create(&self, batch: &Batch) -> Result<(), StorageError>;

    /// Fetch one batch (with member ids) by id.
    async fn get(&self, id: &str) -> Result<Option<Batch>, StorageError>;

    /// The batch a job belongs to, if any.
    async fn batch_for_job(&self, job_id: &str) -> Result<Option<Batch>, StorageError>;

    /// Count one member job as terminal and return the updated batch.
    ///
    /// Returns `None` when the job belongs to no batch. When the increment
    /// makes every member terminal, the implementation moves an `Active`
    /// batch to `Completed` in the same operation.
    async fn record_member_terminal(&self, job_id: &str) -> Result<Option<Batch>, StorageError>;

    /// Set a batch's status.
    async fn set_status(&self, id: &str, status: BatchStatus) -> Result<(), StorageError>;
}
