//! Governor configuration: managed directories, thresholds, and retentions.

use std::path::PathBuf;
use std::time::Duration;

use vconv_core::Settings;

/// Cleanup trigger thresholds as percentages of the quota ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Publish a medium warning above this usage.
    pub warn: u8,
    /// Publish a high warning and run aggressive cleanup at or above this.
    pub aggressive: u8,
    /// Run emergency cleanup at or above this.
    pub emergency: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warn: 80,
            aggressive: 90,
            emergency: 95,
        }
    }
}

/// Minimum file ages before each cleanup category may reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Source files of completed conversions.
    pub converted: Duration,
    /// Downloaded output files (also the default schedule for new downloads).
    pub downloaded: Duration,
    /// Temp and chunk scratch files.
    pub temp: Duration,
    /// Artifacts of failed jobs.
    pub failed: Duration,
    /// Unreferenced files in managed directories.
    pub orphan: Duration,
    /// Rotated log files.
    pub log: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            converted: Duration::from_secs(5 * 60),
            downloaded: Duration::from_secs(24 * 3600),
            temp: Duration::from_secs(2 * 3600),
            failed: Duration::from_secs(7 * 24 * 3600),
            orphan: Duration::from_secs(24 * 3600),
            log: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Full governor configuration.
#[derive(Debug, Clone)]
pub struct SpaceConfig {
    /// Directory input files are uploaded into.
    pub upload_dir: PathBuf,
    /// Directory converted files are written into.
    pub output_dir: PathBuf,
    /// Directory for transient files.
    pub temp_dir: PathBuf,
    /// Directory rolling logs are written into.
    pub log_dir: PathBuf,
    /// Cleanup trigger thresholds.
    pub thresholds: Thresholds,
    /// Per-category retention windows.
    pub retention: RetentionConfig,
    /// Interval between usage measurements.
    pub monitor_interval: Duration,
    /// Delay before the first measurement after startup.
    pub startup_delay: Duration,
    /// Interval between scheduled cleanup passes.
    pub cleanup_interval: Duration,
}

impl SpaceConfig {
    /// Build a config rooted at `data_dir` with default layout and timings.
    #[must_use]
    pub fn for_data_dir(data_dir: &std::path::Path) -> Self {
        Self {
            upload_dir: data_dir.join("uploads"),
            output_dir: data_dir.join("outputs"),
            temp_dir: data_dir.join("temp"),
            log_dir: data_dir.join("logs"),
            thresholds: Thresholds::default(),
            retention: RetentionConfig::default(),
            monitor_interval: Duration::from_secs(30),
            startup_delay: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(3600),
        }
    }

    /// Overlay service settings onto the defaults.
    #[must_use]
    pub fn from_settings(settings: &Settings, data_dir: &std::path::Path) -> Self {
        let mut config = Self::for_data_dir(data_dir);
        if let Some(path) = &settings.upload_path {
            config.upload_dir.clone_from(path);
        }
        if let Some(path) = &settings.output_path {
            config.output_dir.clone_from(path);
        }
        if let Some(path) = &settings.temp_path {
            config.temp_dir.clone_from(path);
        }
        if let Some(warn) = settings.threshold_warn {
            config.thresholds.warn = warn;
        }
        if let Some(aggressive) = settings.threshold_aggressive {
            config.thresholds.aggressive = aggressive;
        }
        if let Some(emergency) = settings.threshold_emergency {
            config.thresholds.emergency = emergency;
        }
        if let Some(minutes) = settings.retention_converted_min {
            config.retention.converted = Duration::from_secs(minutes * 60);
        }
        if let Some(hours) = settings.retention_downloaded_h {
            config.retention.downloaded = Duration::from_secs(hours * 3600);
        }
        if let Some(hours) = settings.retention_temp_h {
            config.retention.temp = Duration::from_secs(hours * 3600);
        }
        if let Some(days) = settings.retention_failed_d {
            config.retention.failed = Duration::from_secs(days * 24 * 3600);
        }
        if let Some(days) = settings.retention_orphan_d {
            config.retention.orphan = Duration::from_secs(days * 24 * 3600);
        }
        if let Some(days) = settings.retention_log_d {
            config.retention.log = Duration::from_secs(days * 24 * 3600);
        }
        config.cleanup_interval = settings.effective_cleanup_interval();
        config
    }

    /// The chunk-assembly scratch directory (`uploads/chunks`).
    #[must_use]
    pub fn chunks_dir(&self) -> PathBuf {
        self.upload_dir.join("chunks")
    }
}
