//! Download retention: track output downloads and reclaim the files after a
//! grace period.
//!
//! The persistent `scheduled_delete_at` on each record is the source of
//! truth. A per-record timer performs the delete promptly while the process
//! is up; the periodic sweeper catches anything a restart dropped. The
//! record's single-shot `mark_deleted` transition guarantees the filesystem
//! delete runs at most once per record no matter how many sweeps overlap.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;

use vconv_core::{
    DownloadRecord, DownloadStore, Group, Notification, NotificationBus, TaskStore, UsageBucket,
};

use crate::cleanup::CategoryResult;
use crate::error::SpaceError;
use crate::usage::UsageTracker;

/// Default grace period before a downloaded output is reclaimed.
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Tracks downloads and schedules retention deletes.
pub struct RetentionTracker {
    tasks: Arc<dyn TaskStore>,
    downloads: Arc<dyn DownloadStore>,
    bus: Arc<NotificationBus>,
    usage: Arc<UsageTracker>,
    retention: ChronoDuration,
    output_dir: PathBuf,
    shutdown: CancellationToken,
}

impl RetentionTracker {
    /// Create a tracker with the given retention window.
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        downloads: Arc<dyn DownloadStore>,
        bus: Arc<NotificationBus>,
        usage: Arc<UsageTracker>,
        retention: std::time::Duration,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            tasks,
            downloads,
            bus,
            usage,
            retention: ChronoDuration::from_std(retention)
                .unwrap_or_else(|_| ChronoDuration::hours(DEFAULT_RETENTION_HOURS)),
            output_dir,
            shutdown: CancellationToken::new(),
        }
    }

    /// Record a completed download of `job_id`'s output.
    ///
    /// Schedules the output file for deletion after the retention window; a
    /// record that is already due (zero or negative retention) is processed
    /// immediately.
    pub async fn track(
        self: &Arc<Self>,
        job_id: &str,
        client_addr: Option<String>,
        user_agent: Option<String>,
    ) -> Result<DownloadRecord, SpaceError> {
        let job = self
            .tasks
            .get(job_id)
            .await?
            .ok_or_else(|| SpaceError::UnknownJob(job_id.to_string()))?;

        let file_name = job
            .output_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{job_id}.out"));
        let file_bytes = tokio::fs::metadata(&job.output_path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(job.output_bytes);

        let record = DownloadRecord::new(job_id, file_name, file_bytes, self.retention)
            .with_client(client_addr, user_agent);
        self.downloads.insert(&record).await?;

        tracing::info!(
            job_id = %job_id,
            file = %record.file_name,
            scheduled = %record.scheduled_delete_at,
            "download tracked"
        );
        self.bus.publish(
            &Group::Job(job_id.to_string()),
            Notification::DownloadTracked {
                task_id: record.job_id.clone(),
                file_name: record.file_name.clone(),
                file_size: record.file_bytes,
                download_time: record.downloaded_at,
                scheduled_cleanup_time: record.scheduled_delete_at,
                retention_hours: record.retention_hours(),
            },
        );

        let now = Utc::now();
        if record.is_pending_cleanup(now) {
            self.process_record(&record).await;
        } else {
            self.spawn_timer(record.clone(), now);
        }

        Ok(record)
    }

    /// In-memory timer for one record; the sweeper is the safety net.
    fn spawn_timer(self: &Arc<Self>, record: DownloadRecord, now: DateTime<Utc>) {
        let delay = (record.scheduled_delete_at - now)
            .to_std()
            .unwrap_or_default();
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = tracker.shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    // Re-read so a sweep that already handled the record
                    // turns this into a no-op.
                    match tracker.downloads.get(&record.id).await {
                        Ok(Some(current)) if current.deleted_at.is_none() => {
                            tracker.process_record(&current).await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(record = %record.id, error = %e, "retention timer read failed");
                        }
                    }
                }
            }
        });
    }

    /// One sweep over all records that are due.
    ///
    /// `cutoff_override` replaces the per-record schedule with "downloaded
    /// before this instant" (used by aggressive/emergency cleanup).
    pub async fn sweep_once(
        &self,
        cutoff_override: Option<DateTime<Utc>>,
    ) -> Result<CategoryResult, SpaceError> {
        let records = match cutoff_override {
            Some(cutoff) => self.downloads.list_downloaded_before(cutoff).await?,
            None => self.downloads.list_pending_cleanup(Utc::now()).await?,
        };

        let mut result = CategoryResult::default();
        for record in &records {
            if let Some(bytes) = self.process_record(record).await {
                result.files += 1;
                result.bytes += bytes;
            }
        }
        Ok(result)
    }

    /// Perform the retention delete for one record.
    ///
    /// Returns the bytes removed from disk, or `None` when another path
    /// already handled the record or the delete was skipped.
    async fn process_record(&self, record: &DownloadRecord) -> Option<u64> {
        let path = match self.tasks.get(&record.job_id).await {
            Ok(Some(job)) => job.output_path,
            _ => self.output_dir.join(&record.file_name),
        };

        // Never touch a path a live job still references.
        if let Ok(referenced) = self.tasks.referenced_paths().await {
            if referenced.contains(&path) {
                tracing::debug!(record = %record.id, path = %path.display(), "skipping referenced path");
                return None;
            }
        }

        // Single-shot claim; the loser of a concurrent sweep backs off here.
        match self.downloads.mark_deleted(&record.id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                tracing::warn!(record = %record.id, error = %e, "failed to mark download record");
                return None;
            }
        }

        let removed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "retention delete failed");
                false
            }
        };

        if removed {
            self.usage.sub(UsageBucket::Outputs, record.file_bytes);
            tracing::info!(
                job_id = %record.job_id,
                file = %record.file_name,
                bytes = record.file_bytes,
                "downloaded output reclaimed"
            );
            self.bus.publish(
                &Group::Job(record.job_id.clone()),
                Notification::DownloadedFileCleanedUp {
                    task_id: record.job_id.clone(),
                    file_name: record.file_name.clone(),
                    file_size: record.file_bytes,
                    cleanup_time: Utc::now(),
                    retention_hours: record.retention_hours(),
                },
            );
            Some(record.file_bytes)
        } else {
            None
        }
    }

    /// Long-lived sweeper guarding against timers lost to restarts.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick doubles as the post-restart catch-up.
            loop {
                tokio::select! {
                    () = tracker.shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        match tracker.sweep_once(None).await {
                            Ok(result) if result.files > 0 => {
                                tracing::info!(files = result.files, bytes = result.bytes, "retention sweep reclaimed files");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
                        }
                    }
                }
            }
        })
    }

    /// Stop timers and the sweeper.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
