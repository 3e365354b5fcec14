//! Optional grouping of jobs into batches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Member jobs are queued or running.
    Active,
    /// Member jobs are held back from dispatch.
    Paused,
    /// Every member job reached a terminal status.
    Completed,
    /// The batch was cancelled before completion.
    Cancelled,
}

impl BatchStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation; unknown strings map to `Cancelled`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            _ => Self::Cancelled,
        }
    }
}

/// A group of jobs admitted together.
///
/// Completion advances as member jobs reach terminal status; the aggregate
/// space estimate recorded at registration drives batch-level warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Unique batch id.
    pub id: String,
    /// Member job ids.
    pub job_ids: Vec<String>,
    /// Current status.
    pub status: BatchStatus,
    /// Number of member jobs at registration time.
    pub total_jobs: u32,
    /// Members that have reached a terminal status.
    pub completed_jobs: u32,
    /// Aggregate space requirement estimated at registration.
    pub estimated_bytes: u64,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// Create an `Active` batch over the given member jobs.
    #[must_use]
    pub fn new(job_ids: Vec<String>, estimated_bytes: u64) -> Self {
        let total_jobs = job_ids.len() as u32;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_ids,
            status: BatchStatus::Active,
            total_jobs,
            completed_jobs: 0,
            estimated_bytes,
            created_at: Utc::now(),
        }
    }

    /// Whether every member has reached a terminal status.
    #[must_use]
    pub const fn all_members_terminal(&self) -> bool {
        self.completed_jobs >= self.total_jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_batch_is_active_and_counts_members() {
        let batch = Batch::new(vec!["a".into(), "b".into()], 42);
        assert_eq!(batch.status, BatchStatus::Active);
        assert_eq!(batch.total_jobs, 2);
        assert_eq!(batch.completed_jobs, 0);
        assert!(!batch.all_members_terminal());
    }

    #[test]
    fn batch_status_round_trips() {
        for status in [
            BatchStatus::Active,
            BatchStatus::Paused,
            BatchStatus::Completed,
            BatchStatus::Cancelled,
        ] {
            assert_eq!(BatchStatus::parse(status.as_str()), status);
        }
    }
}
