//! The disk-space governor: quota admission, usage monitoring, and the
//! tiered cleanup passes.
//!
//! The governor never pauses running jobs. It measures, warns, reclaims, and
//! refuses new admissions; backing off on new work is the client's call.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use vconv_core::{
    Group, Notification, NotificationBus, SpaceCheck, SpaceStore, TaskStore, UsageBucket,
    WarningSeverity,
};

use crate::cleanup::{
    CategoryResult, CleanupPlan, CleanupResult, CleanupTier, DownloadedCleanup, ManualCleanup,
};
use crate::config::SpaceConfig;
use crate::error::SpaceError;
use crate::retention::RetentionTracker;
use crate::usage::{UsageTracker, walk_files};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Usage percentage above which batch registration warns regardless of fit.
const BATCH_WARN_PERCENT: f64 = 85.0;

/// Disk-space governor over the managed directory trees.
pub struct SpaceGovernor {
    store: Arc<dyn SpaceStore>,
    tasks: Arc<dyn TaskStore>,
    retention: Arc<RetentionTracker>,
    bus: Arc<NotificationBus>,
    usage: Arc<UsageTracker>,
    config: SpaceConfig,
    shutdown: CancellationToken,
}

impl SpaceGovernor {
    /// Create a governor with explicit dependencies.
    pub fn new(
        store: Arc<dyn SpaceStore>,
        tasks: Arc<dyn TaskStore>,
        retention: Arc<RetentionTracker>,
        bus: Arc<NotificationBus>,
        usage: Arc<UsageTracker>,
        config: SpaceConfig,
    ) -> Self {
        Self {
            store,
            tasks,
            retention,
            bus,
            usage,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// The usage tracker shared with producers.
    #[must_use]
    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// Admission check: does `required_bytes` fit under the quota?
    pub async fn check_space(&self, required_bytes: u64) -> Result<SpaceCheck, SpaceError> {
        let quota = self.store.quota().await?;
        Ok(SpaceCheck::evaluate(
            &quota,
            self.usage.total_used(),
            required_bytes,
        ))
    }

    /// Evaluate a registered batch's aggregate requirement.
    ///
    /// Publishes a `BatchSpaceWarning` to the batch's group when usage is
    /// already high or the requirement exceeds what is available.
    pub async fn evaluate_batch(
        &self,
        batch_id: &str,
        required_bytes: u64,
    ) -> Result<SpaceCheck, SpaceError> {
        let quota = self.store.quota().await?;
        let used = self.usage.total_used();
        let check = SpaceCheck::evaluate(&quota, used, required_bytes);

        let usage_percentage = percentage(used, quota.max_total_bytes);
        if usage_percentage > BATCH_WARN_PERCENT || !check.sufficient {
            let message = if check.sufficient {
                format!("storage is {usage_percentage:.0}% full; batch may be throttled by cleanup")
            } else {
                format!(
                    "batch needs {:.2} GB but only {:.2} GB is available",
                    required_bytes as f64 / BYTES_PER_GB,
                    check.available_bytes as f64 / BYTES_PER_GB,
                )
            };
            tracing::warn!(batch_id = %batch_id, required_bytes, usage_percentage, "batch space warning");
            self.bus.publish(
                &Group::Batch(batch_id.to_string()),
                Notification::BatchSpaceWarning {
                    message,
                    usage_percentage,
                    available_space_gb: check.available_bytes as f64 / BYTES_PER_GB,
                    batch_id: batch_id.to_string(),
                    required_space_gb: required_bytes as f64 / BYTES_PER_GB,
                },
            );
        }

        Ok(check)
    }

    /// Run one automatic cleanup tier.
    pub async fn run_tier(&self, tier: CleanupTier) -> Result<CleanupResult, SpaceError> {
        self.run_plan(CleanupPlan::for_tier(tier, &self.config))
            .await
    }

    /// Run a manual cleanup with per-category selection.
    pub async fn run_manual(&self, options: ManualCleanup) -> Result<CleanupResult, SpaceError> {
        self.run_plan(CleanupPlan::manual(options, &self.config))
            .await
    }

    /// Execute a resolved cleanup plan across all six categories.
    ///
    /// A single file's failure never aborts the pass; it is logged and the
    /// pass continues with the next candidate.
    async fn run_plan(&self, plan: CleanupPlan) -> Result<CleanupResult, SpaceError> {
        let started = std::time::Instant::now();
        let referenced = self.tasks.referenced_paths().await?;

        let sources = match plan.converted {
            Some(retention) => self.clean_completed_sources(retention, &referenced).await,
            None => CategoryResult::default(),
        };

        let downloaded = match plan.downloaded {
            DownloadedCleanup::Schedule => self.retention.sweep_once(None).await?,
            DownloadedCleanup::MaxAge(age) => {
                let cutoff = Utc::now() - chrono::Duration::from_std(age).unwrap_or_default();
                self.retention.sweep_once(Some(cutoff)).await?
            }
            DownloadedCleanup::Off => CategoryResult::default(),
        };

        let temp = match plan.temp {
            Some(retention) => self.clean_temp_files(retention, &referenced),
            None => CategoryResult::default(),
        };

        let (failed_inputs, failed_outputs) = match plan.failed {
            Some(retention) => self.clean_failed_artifacts(retention, &referenced).await?,
            None => (CategoryResult::default(), CategoryResult::default()),
        };

        let orphans = match plan.orphan {
            Some(retention) => self.clean_orphans(retention, &referenced).await?,
            None => CategoryResult::default(),
        };

        let logs = match plan.log {
            Some(retention) => self.clean_logs(retention),
            None => CategoryResult::default(),
        };

        let mut originals = sources;
        originals.absorb(failed_inputs);
        let mut converted = downloaded;
        converted.absorb(failed_outputs);

        let cleaned_files =
            originals.files + converted.files + temp.files + orphans.files + logs.files;
        let cleaned_bytes =
            originals.bytes + converted.bytes + temp.bytes + orphans.bytes + logs.bytes;

        let result = CleanupResult {
            cleanup_type: plan.label.to_string(),
            cleaned_bytes,
            cleaned_files,
            details: vconv_core::CleanupDetails {
                original_files: originals.files,
                converted_files: converted.files,
                temp_files: temp.files,
                orphan_files: orphans.files,
                log_files: logs.files,
            },
        };

        tracing::info!(
            tier = plan.label,
            files = cleaned_files,
            bytes = cleaned_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cleanup pass finished"
        );
        self.bus.broadcast(Notification::CleanupCompleted {
            cleanup_type: result.cleanup_type.clone(),
            total_cleaned_size: result.cleaned_bytes,
            total_cleaned_files: result.cleaned_files,
            details: result.details,
        });

        Ok(result)
    }

    /// Category 1: source files of completed conversions.
    async fn clean_completed_sources(
        &self,
        retention: Duration,
        referenced: &HashSet<PathBuf>,
    ) -> CategoryResult {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let candidates = match self.tasks.list_source_reclaim_candidates(cutoff).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "cannot list source reclaim candidates");
                return CategoryResult::default();
            }
        };

        let mut result = CategoryResult::default();
        for job in &candidates {
            if referenced.contains(&job.input_path) {
                continue;
            }
            if let Some(bytes) = remove_file_sized(&job.input_path).await {
                result.files += 1;
                result.bytes += bytes;
                self.usage.sub(UsageBucket::Uploads, bytes);
            }
            // Mark even when the file was already gone so the candidate list
            // shrinks.
            if let Err(e) = self.tasks.mark_source_reclaimed(&job.id).await {
                tracing::warn!(job_id = %job.id, error = %e, "cannot mark source reclaimed");
            }
        }
        result
    }

    /// Category 3: temp and chunk scratch files older than the cutoff.
    fn clean_temp_files(
        &self,
        retention: Duration,
        referenced: &HashSet<PathBuf>,
    ) -> CategoryResult {
        let cutoff = SystemTime::now().checked_sub(retention);
        let mut result = CategoryResult::default();
        for root in [self.config.temp_dir.clone(), self.config.chunks_dir()] {
            result.absorb(remove_old_files(&root, cutoff, referenced, |bytes| {
                self.usage.sub(UsageBucket::Temp, bytes);
            }));
        }
        result
    }

    /// Category 4: artifacts of failed jobs (input, partial output, chunks).
    async fn clean_failed_artifacts(
        &self,
        retention: Duration,
        referenced: &HashSet<PathBuf>,
    ) -> Result<(CategoryResult, CategoryResult), SpaceError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let failed = self.tasks.list_by_status(vconv_core::JobStatus::Failed).await?;

        let mut inputs = CategoryResult::default();
        let mut outputs = CategoryResult::default();
        for job in &failed {
            let finished = job.completed_at.unwrap_or(job.created_at);
            if finished >= cutoff {
                continue;
            }
            if !referenced.contains(&job.input_path) {
                if let Some(bytes) = remove_file_sized(&job.input_path).await {
                    inputs.files += 1;
                    inputs.bytes += bytes;
                    self.usage.sub(UsageBucket::Uploads, bytes);
                }
            }
            if !referenced.contains(&job.output_path) {
                if let Some(bytes) = remove_file_sized(&job.output_path).await {
                    outputs.files += 1;
                    outputs.bytes += bytes;
                    self.usage.sub(UsageBucket::Outputs, bytes);
                }
            }
            let chunk_dir = self.config.chunks_dir().join(&job.id);
            let chunk_bytes = crate::usage::dir_size(&chunk_dir);
            if chunk_bytes > 0 && tokio::fs::remove_dir_all(&chunk_dir).await.is_ok() {
                inputs.bytes += chunk_bytes;
                self.usage.sub(UsageBucket::Temp, chunk_bytes);
            }
        }
        Ok((inputs, outputs))
    }

    /// Category 5: unreferenced files in the uploads/outputs directories.
    async fn clean_orphans(
        &self,
        retention: Duration,
        referenced: &HashSet<PathBuf>,
    ) -> Result<CategoryResult, SpaceError> {
        let known = self.tasks.known_paths().await?;
        let cutoff = SystemTime::now().checked_sub(retention);
        let chunks_dir = self.config.chunks_dir();

        let mut result = CategoryResult::default();
        for (root, bucket) in [
            (self.config.upload_dir.clone(), UsageBucket::Uploads),
            (self.config.output_dir.clone(), UsageBucket::Outputs),
        ] {
            for entry in walk_files(&root) {
                // Chunk scratch belongs to the temp category.
                if entry.path.starts_with(&chunks_dir) {
                    continue;
                }
                if known.contains(&entry.path) || referenced.contains(&entry.path) {
                    continue;
                }
                if let Some(cutoff) = cutoff {
                    if entry.modified >= cutoff {
                        continue;
                    }
                }
                match std::fs::remove_file(&entry.path) {
                    Ok(()) => {
                        result.files += 1;
                        result.bytes += entry.bytes;
                        self.usage.sub(bucket, entry.bytes);
                    }
                    Err(e) => {
                        tracing::warn!(path = %entry.path.display(), error = %e, "orphan delete failed");
                    }
                }
            }
        }
        Ok(result)
    }

    /// Category 6: rotated log files older than the cutoff.
    fn clean_logs(&self, retention: Duration) -> CategoryResult {
        let cutoff = SystemTime::now().checked_sub(retention);
        let mut result = CategoryResult::default();
        for entry in walk_files(&self.config.log_dir) {
            if entry.path.extension().and_then(|ext| ext.to_str()) != Some("log") {
                continue;
            }
            if let Some(cutoff) = cutoff {
                if entry.modified >= cutoff {
                    continue;
                }
            }
            match std::fs::remove_file(&entry.path) {
                Ok(()) => {
                    result.files += 1;
                    result.bytes += entry.bytes;
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path.display(), error = %e, "log delete failed");
                }
            }
        }
        result
    }

    /// Long-lived monitor: measure, publish telemetry, warn, and trigger
    /// threshold cleanups.
    pub fn spawn_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let governor = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = governor.shutdown.cancelled() => return,
                () = tokio::time::sleep(governor.config.startup_delay) => {}
            }
            let mut tick = tokio::time::interval(governor.config.monitor_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = governor.shutdown.cancelled() => break,
                    _ = tick.tick() => governor.monitor_once().await,
                }
            }
        })
    }

    /// One monitor cycle (public so tests can drive it directly).
    pub async fn monitor_once(&self) {
        let usage = self.usage.measure(&self.config).await;
        if let Err(e) = self.store.set_usage(&usage).await {
            tracing::warn!(error = %e, "cannot persist usage measurement");
        }

        let quota = match self.store.quota().await {
            Ok(quota) => quota,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read quota");
                return;
            }
        };

        let used = usage.total_used();
        let usage_percentage = percentage(used, quota.max_total_bytes);
        let available = quota.max_total_bytes.saturating_sub(used);

        self.bus.broadcast(Notification::DiskSpaceUpdate {
            total_space: quota.max_total_bytes,
            used_space: used,
            available_space: available,
            usage_percentage,
        });

        let thresholds = self.config.thresholds;
        if usage_percentage > f64::from(thresholds.aggressive) {
            tracing::warn!(usage_percentage, "storage critically full");
            self.publish_space_warning(usage_percentage, available, WarningSeverity::High);
        } else if usage_percentage > f64::from(thresholds.warn) {
            tracing::warn!(usage_percentage, "storage filling up");
            self.publish_space_warning(usage_percentage, available, WarningSeverity::Medium);
        }

        if usage_percentage >= f64::from(thresholds.emergency) {
            if let Err(e) = self.run_tier(CleanupTier::Emergency).await {
                tracing::error!(error = %e, "emergency cleanup failed");
            }
        } else if usage_percentage >= f64::from(thresholds.aggressive) {
            if let Err(e) = self.run_tier(CleanupTier::Aggressive).await {
                tracing::error!(error = %e, "aggressive cleanup failed");
            }
        }
    }

    fn publish_space_warning(&self, usage_percentage: f64, available: u64, severity: WarningSeverity) {
        let level = match severity {
            WarningSeverity::Medium => "filling up",
            WarningSeverity::High => "almost full",
        };
        self.bus.broadcast(Notification::SpaceWarning {
            message: format!("storage {level}: {usage_percentage:.1}% used"),
            usage_percentage,
            available_space_gb: available as f64 / BYTES_PER_GB,
            severity,
        });
    }

    /// Long-lived scheduled-cleanup timer.
    pub fn spawn_scheduled_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let governor = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(governor.config.cleanup_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Skip the immediate first tick; startup is not a cleanup event.
            tick.tick().await;
            loop {
                tokio::select! {
                    () = governor.shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(e) = governor.run_tier(CleanupTier::Scheduled).await {
                            tracing::warn!(error = %e, "scheduled cleanup failed");
                        }
                    }
                }
            }
        })
    }

    /// Stop the monitor and cleanup loops.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn percentage(used: u64, max: u64) -> f64 {
    if max == 0 {
        return 0.0;
    }
    used as f64 / max as f64 * 100.0
}

/// Remove a file, returning its size; `None` when missing or on failure.
async fn remove_file_sized(path: &Path) -> Option<u64> {
    let bytes = tokio::fs::metadata(path).await.ok()?.len();
    match tokio::fs::remove_file(path).await {
        Ok(()) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "file delete failed");
            None
        }
    }
}


/// Remove files under `root` older than `cutoff`, skipping referenced paths.
fn remove_old_files(
    root: &Path,
    cutoff: Option<SystemTime>,
    referenced: &HashSet<PathBuf>,
    mut on_removed: impl FnMut(u64),
) -> CategoryResult {
    let mut result = CategoryResult::default();
    for entry in walk_files(root) {
        if referenced.contains(&entry.path) {
            continue;
        }
        if let Some(cutoff) = cutoff {
            if entry.modified >= cutoff {
                continue;
            }
        }
        match std::fs::remove_file(&entry.path) {
            Ok(()) => {
                result.files += 1;
                result.bytes += entry.bytes;
                on_removed(entry.bytes);
            }
            Err(e) => {
                tracing::warn!(path = %entry.path.display(), error = %e, "temp delete failed");
            }
        }
    }
    result
}
