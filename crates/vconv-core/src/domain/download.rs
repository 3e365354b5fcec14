//! Download tracking records for output-file retention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One tracked download of a job's output file.
///
/// Every successful download response creates a record; multiple records per
/// job are expected. The record survives restarts so retention deletes are
/// never lost to a dropped in-memory timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Unique record id.
    pub id: String,
    /// Job whose output was downloaded.
    pub job_id: String,
    /// File name served to the client.
    pub file_name: String,
    /// Size of the served file in bytes.
    pub file_bytes: u64,
    /// When the download completed.
    pub downloaded_at: DateTime<Utc>,
    /// When the output file becomes eligible for deletion.
    pub scheduled_delete_at: DateTime<Utc>,
    /// When the retention delete actually ran (file removed or already gone).
    pub deleted_at: Option<DateTime<Utc>>,
    /// Client address, if the surface captured one.
    pub client_addr: Option<String>,
    /// Client user agent, if the surface captured one.
    pub user_agent: Option<String>,
}

impl DownloadRecord {
    /// Create a record for a download that completed now.
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        file_name: impl Into<String>,
        file_bytes: u64,
        retention: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            file_name: file_name.into(),
            file_bytes,
            downloaded_at: now,
            scheduled_delete_at: now + retention,
            deleted_at: None,
            client_addr: None,
            user_agent: None,
        }
    }

    /// Attach client metadata.
    #[must_use]
    pub fn with_client(mut self, addr: Option<String>, user_agent: Option<String>) -> Self {
        self.client_addr = addr;
        self.user_agent = user_agent;
        self
    }

    /// Whether this record is due for cleanup at `now`.
    #[must_use]
    pub fn is_pending_cleanup(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && self.scheduled_delete_at <= now
    }

    /// Retention window length in hours (for event payloads).
    #[must_use]
    pub fn retention_hours(&self) -> f64 {
        let secs = (self.scheduled_delete_at - self.downloaded_at).num_milliseconds() as f64 / 1000.0;
        secs / 3600.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_is_not_pending_cleanup() {
        let rec = DownloadRecord::new("job-1", "out.mp4", 10, chrono::Duration::hours(24));
        assert!(!rec.is_pending_cleanup(Utc::now()));
    }

    #[test]
    fn record_becomes_pending_after_schedule_elapses() {
        let rec = DownloadRecord::new("job-1", "out.mp4", 10, chrono::Duration::seconds(0));
        assert!(rec.is_pending_cleanup(Utc::now() + chrono::Duration::seconds(1)));
    }

    #[test]
    fn deleted_record_is_never_pending() {
        let mut rec = DownloadRecord::new("job-1", "out.mp4", 10, chrono::Duration::seconds(0));
        rec.deleted_at = Some(Utc::now());
        assert!(!rec.is_pending_cleanup(Utc::now() + chrono::Duration::hours(1)));
    }

    #[test]
    fn retention_hours_reflects_the_window() {
        let rec = DownloadRecord::new("job-1", "out.mp4", 10, chrono::Duration::hours(24));
        assert!((rec.retention_hours() - 24.0).abs() < 1e-6);
    }
}
