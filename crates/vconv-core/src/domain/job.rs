//! Transcode job domain types and the job state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::options::ConversionOptions;

/// Lifecycle status of a transcode job.
///
/// Transitions are strictly `Pending -> Converting -> (Completed | Failed |
/// Cancelled)`, with cancellation allowed from any non-terminal state. The
/// store's conditional-update claim is the only path into `Converting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created and waiting for a worker slot.
    Pending,
    /// Claimed by a worker; an encoder process is (about to be) running.
    Converting,
    /// Encoder exited cleanly and the output file was verified.
    Completed,
    /// Encoder failed to start, exited non-zero, or stalled.
    Failed,
    /// Cancelled by the user before or during encoding.
    Cancelled,
}

impl JobStatus {
    /// Storage representation (lowercase text column).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Converting => "converting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation; unknown strings map to `Failed`
    /// so a corrupted row can never be mistaken for runnable work.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "converting" => Self::Converting,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    /// Numeric code used on the wire (`Pending=0 .. Cancelled=4`).
    #[must_use]
    pub const fn wire_code(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Converting => 1,
            Self::Completed => 2,
            Self::Failed => 3,
            Self::Cancelled => 4,
        }
    }

    /// Whether this status is terminal (no further transitions allowed).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The three terminal statuses, in wire order.
    #[must_use]
    pub const fn terminal_statuses() -> [Self; 3] {
        [Self::Completed, Self::Failed, Self::Cancelled]
    }
}

/// A unit of transcoding work with its own lifecycle, input, output, and
/// settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique identifier, assigned at creation.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// Absolute path of the uploaded source file.
    pub input_path: PathBuf,
    /// Absolute path the encoder writes to.
    pub output_path: PathBuf,
    /// Size of the source file in bytes.
    pub input_bytes: u64,
    /// Size of the output file in bytes; `0` until completion.
    pub output_bytes: u64,
    /// Name of the preset this job encodes with.
    pub preset_name: String,
    /// Per-job overrides applied on top of the preset.
    pub overrides: ConversionOptions,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Encode progress, `0..=100`.
    pub progress: u8,
    /// Container duration in seconds, filled once probed.
    pub duration_sec: Option<f64>,
    /// Encoder position in seconds (transient).
    pub current_sec: Option<f64>,
    /// Encoder throughput multiplier (transient).
    pub speed: Option<f64>,
    /// Projected remaining seconds (transient).
    pub eta_sec: Option<f64>,
    /// Failure message; populated only in `Failed` (and the cancel reason
    /// in `Cancelled`).
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when the job first enters `Converting`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the job reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new `Pending` job with a fresh id.
    #[must_use]
    pub fn new(new: NewJob) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            input_path: new.input_path,
            output_path: new.output_path,
            input_bytes: new.input_bytes,
            output_bytes: 0,
            preset_name: new.preset_name,
            overrides: new.overrides,
            status: JobStatus::Pending,
            progress: 0,
            duration_sec: None,
            current_sec: None,
            speed: None,
            eta_sec: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the job is in a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Parameters for creating a job.
///
/// The upload surface assembles this once the input file is complete on
/// disk; everything else (id, timestamps, status) is assigned by [`Job::new`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub input_bytes: u64,
    pub preset_name: String,
    pub overrides: ConversionOptions,
}

/// Partial progress update written by the runner.
///
/// Never changes status; terminal writes go through `set_terminal`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressPatch {
    /// New progress percentage, `0..=100`.
    pub progress: u8,
    /// Encoder position in seconds, if a progress line carried one.
    pub current_sec: Option<f64>,
    /// Throughput multiplier relative to realtime.
    pub speed: Option<f64>,
    /// Projected remaining seconds.
    pub eta_sec: Option<f64>,
    /// Container duration, persisted once the probe succeeds.
    pub duration_sec: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            JobStatus::Pending,
            JobStatus::Converting,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_text_maps_to_failed() {
        assert_eq!(JobStatus::parse("exploded"), JobStatus::Failed);
    }

    #[test]
    fn wire_codes_are_stable() {
        assert_eq!(JobStatus::Pending.wire_code(), 0);
        assert_eq!(JobStatus::Converting.wire_code(), 1);
        assert_eq!(JobStatus::Completed.wire_code(), 2);
        assert_eq!(JobStatus::Failed.wire_code(), 3);
        assert_eq!(JobStatus::Cancelled.wire_code(), 4);
    }

    #[test]
    fn new_job_starts_pending_with_zero_output() {
        let job = Job::new(NewJob {
            name: "clip".into(),
            input_path: "/data/uploads/clip.mov".into(),
            output_path: "/data/outputs/clip.mp4".into(),
            input_bytes: 1024,
            preset_name: "Fast 1080p30".into(),
            overrides: ConversionOptions::default(),
        });

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.output_bytes, 0);
        assert_eq!(job.progress, 0);
        assert!(job.started_at.is_none());
        assert!(!job.id.is_empty());
    }
}
