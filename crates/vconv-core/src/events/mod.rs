//! Canonical event union for all push notifications.
//!
//! This module is the single source of truth for events delivered to
//! subscribed clients and internal listeners. Every producer (runner,
//! dispatcher, governor, retention tracker) publishes these through the
//! notification bus; no producer owns its own send path.
//!
//! # Wire Format
//!
//! Events are serialized as a `type`-tagged envelope with the payload under
//! `data` and an RFC 3339 timestamp:
//!
//! ```json
//! { "type": "ProgressUpdate", "data": { "taskId": "…", "progress": 42 }, "timestamp": "…" }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity attached to space warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    Medium,
    High,
}

/// Per-category file counts for a cleanup summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupDetails {
    /// Reclaimed source files of completed conversions.
    pub original_files: u64,
    /// Expired converted output files.
    pub converted_files: u64,
    /// Temp/chunk scratch files.
    pub temp_files: u64,
    /// Unreferenced files in managed directories.
    pub orphan_files: u64,
    /// Rotated log files.
    pub log_files: u64,
}

/// Typed notification payloads.
///
/// Variant names are the wire `type` tag; payload field names follow the
/// client-facing camelCase contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Notification {
    /// Encoder progress for one job.
    ProgressUpdate {
        #[serde(rename = "taskId")]
        task_id: String,
        progress: u8,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
        #[serde(rename = "remainingSeconds", skip_serializing_if = "Option::is_none")]
        remaining_seconds: Option<f64>,
    },

    /// A job changed status.
    StatusUpdate {
        #[serde(rename = "taskId")]
        task_id: String,
        /// Numeric status code (`Pending=0 .. Cancelled=4`).
        status: u8,
        #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },

    /// A job was created and queued.
    TaskCreated {
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(rename = "taskName")]
        task_name: String,
    },

    /// A job finished encoding successfully.
    TaskCompleted {
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(rename = "taskName")]
        task_name: String,
        /// Final numeric status code.
        status: u8,
        #[serde(rename = "outputBytes")]
        output_bytes: u64,
    },

    /// Operator-facing free-form notice.
    SystemNotification {
        message: String,
        level: String,
    },

    /// Periodic storage telemetry.
    DiskSpaceUpdate {
        #[serde(rename = "totalSpace")]
        total_space: u64,
        #[serde(rename = "usedSpace")]
        used_space: u64,
        #[serde(rename = "availableSpace")]
        available_space: u64,
        #[serde(rename = "usagePercentage")]
        usage_percentage: f64,
    },

    /// Usage crossed a warning threshold.
    SpaceWarning {
        message: String,
        #[serde(rename = "usagePercentage")]
        usage_percentage: f64,
        #[serde(rename = "availableSpaceGB")]
        available_space_gb: f64,
        severity: WarningSeverity,
    },

    /// A registered batch may not fit in the remaining space.
    BatchSpaceWarning {
        message: String,
        #[serde(rename = "usagePercentage")]
        usage_percentage: f64,
        #[serde(rename = "availableSpaceGB")]
        available_space_gb: f64,
        #[serde(rename = "batchId")]
        batch_id: String,
        #[serde(rename = "requiredSpaceGB")]
        required_space_gb: f64,
    },

    /// A cleanup tier finished.
    CleanupCompleted {
        #[serde(rename = "cleanupType")]
        cleanup_type: String,
        #[serde(rename = "totalCleanedSize")]
        total_cleaned_size: u64,
        #[serde(rename = "totalCleanedFiles")]
        total_cleaned_files: u64,
        details: CleanupDetails,
    },

    /// A download of a job's output was recorded.
    DownloadTracked {
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "fileSize")]
        file_size: u64,
        #[serde(rename = "downloadTime")]
        download_time: DateTime<Utc>,
        #[serde(rename = "scheduledCleanupTime")]
        scheduled_cleanup_time: DateTime<Utc>,
        #[serde(rename = "retentionHours")]
        retention_hours: f64,
    },

    /// A downloaded output file was removed by retention cleanup.
    DownloadedFileCleanedUp {
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "fileSize")]
        file_size: u64,
        #[serde(rename = "cleanupTime")]
        cleanup_time: DateTime<Utc>,
        #[serde(rename = "retentionHours")]
        retention_hours: f64,
    },
}

impl Notification {
    /// The wire `type` tag for this event.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::ProgressUpdate { .. } => "ProgressUpdate",
            Self::StatusUpdate { .. } => "StatusUpdate",
            Self::TaskCreated { .. } => "TaskCreated",
            Self::TaskCompleted { .. } => "TaskCompleted",
            Self::SystemNotification { .. } => "SystemNotification",
            Self::DiskSpaceUpdate { .. } => "DiskSpaceUpdate",
            Self::SpaceWarning { .. } => "SpaceWarning",
            Self::BatchSpaceWarning { .. } => "BatchSpaceWarning",
            Self::CleanupCompleted { .. } => "CleanupCompleted",
            Self::DownloadTracked { .. } => "DownloadTracked",
            Self::DownloadedFileCleanedUp { .. } => "DownloadedFileCleanedUp",
        }
    }
}

/// A notification stamped for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The typed payload (`type` + `data` on the wire).
    #[serde(flatten)]
    pub event: Notification,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Stamp an event with the current time.
    #[must_use]
    pub fn now(event: Notification) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}
