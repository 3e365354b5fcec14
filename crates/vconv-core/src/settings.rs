//! Service settings and validation.
//!
//! Settings are loaded from an optional JSON config file with environment
//! overrides on top (`VCONV_*`), then validated once at startup. All fields
//! are optional so a partial config file works; `effective_*` accessors
//! apply the documented defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default interval between queue polls.
pub const DEFAULT_QUEUE_CHECK_INTERVAL_SECS: u64 = 10;

/// Default interval between scheduled cleanup passes.
pub const DEFAULT_CLEANUP_INTERVAL_MINUTES: u64 = 60;

/// Default minimum spacing between persisted/published progress updates.
pub const DEFAULT_PROGRESS_UPDATE_INTERVAL_MS: u64 = 200;

/// Default byte threshold for size-based progress updates.
pub const DEFAULT_PROGRESS_UPDATE_THRESHOLD_BYTES: u64 = 5 * 1024 * 1024;

/// Service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Directory input files are uploaded into.
    pub upload_path: Option<PathBuf>,
    /// Directory converted files are written into.
    pub output_path: Option<PathBuf>,
    /// Directory for transient files.
    pub temp_path: Option<PathBuf>,
    /// Maximum accepted upload size in bytes.
    pub max_file_size: Option<u64>,
    /// Accepted upload extensions (lowercase, without dot).
    pub allowed_extensions: Option<Vec<String>>,
    /// Worker-pool bound; defaults to the logical CPU count.
    pub max_concurrent_conversions: Option<u32>,
    /// Queue poll interval in seconds.
    pub queue_check_interval_seconds: Option<u64>,
    /// Scheduled cleanup interval in minutes.
    pub cleanup_interval_minutes: Option<u64>,
    /// FFmpeg binary path; `ffmpeg` on `PATH` when unset.
    pub ffmpeg_path: Option<PathBuf>,
    /// FFprobe binary path; `ffprobe` on `PATH` when unset.
    pub ffprobe_path: Option<PathBuf>,
    /// Storage quota ceiling in bytes.
    pub quota_max_bytes: Option<u64>,
    /// Storage quota reservation in bytes.
    pub quota_reserved_bytes: Option<u64>,
    /// Whether quota admission is enforced.
    pub quota_enabled: Option<bool>,
    /// Warning threshold as a percentage of quota.
    pub threshold_warn: Option<u8>,
    /// Aggressive-cleanup threshold as a percentage of quota.
    pub threshold_aggressive: Option<u8>,
    /// Emergency-cleanup threshold as a percentage of quota.
    pub threshold_emergency: Option<u8>,
    /// Minutes before a completed conversion's source is reclaimed.
    pub retention_converted_min: Option<u64>,
    /// Hours a downloaded output survives after its last download.
    pub retention_downloaded_h: Option<u64>,
    /// Hours before temp files are reclaimed.
    pub retention_temp_h: Option<u64>,
    /// Days before failed-job artifacts are reclaimed.
    pub retention_failed_d: Option<u64>,
    /// Days before orphan files are reclaimed.
    pub retention_orphan_d: Option<u64>,
    /// Days before rotated logs are reclaimed.
    pub retention_log_d: Option<u64>,
    /// Minimum spacing between progress updates, in milliseconds.
    pub progress_update_interval_ms: Option<u64>,
    /// Byte delta that forces a progress update regardless of spacing.
    pub progress_update_threshold_bytes: Option<u64>,
}

impl Settings {
    /// Load settings: defaults, then the config file (if any), then
    /// `VCONV_*` environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match config_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| SettingsError::ConfigFile(path.to_path_buf(), e.to_string()))?;
                serde_json::from_str(&text)
                    .map_err(|e| SettingsError::ConfigFile(path.to_path_buf(), e.to_string()))?
            }
            None => Self::default(),
        };
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Overlay recognized `VCONV_*` environment variables.
    fn apply_env(&mut self) {
        fn path_var(name: &str) -> Option<PathBuf> {
            std::env::var_os(name).map(PathBuf::from)
        }
        fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        if let Some(v) = path_var("VCONV_UPLOAD_PATH") {
            self.upload_path = Some(v);
        }
        if let Some(v) = path_var("VCONV_OUTPUT_PATH") {
            self.output_path = Some(v);
        }
        if let Some(v) = path_var("VCONV_TEMP_PATH") {
            self.temp_path = Some(v);
        }
        if let Some(v) = path_var("VCONV_FFMPEG_PATH") {
            self.ffmpeg_path = Some(v);
        }
        if let Some(v) = path_var("VCONV_FFPROBE_PATH") {
            self.ffprobe_path = Some(v);
        }
        if let Some(v) = parse_var("VCONV_MAX_CONCURRENT_CONVERSIONS") {
            self.max_concurrent_conversions = Some(v);
        }
        if let Some(v) = parse_var("VCONV_QUEUE_CHECK_INTERVAL_SECONDS") {
            self.queue_check_interval_seconds = Some(v);
        }
        if let Some(v) = parse_var("VCONV_QUOTA_MAX_BYTES") {
            self.quota_max_bytes = Some(v);
        }
        if let Some(v) = parse_var("VCONV_QUOTA_RESERVED_BYTES") {
            self.quota_reserved_bytes = Some(v);
        }
        if let Some(v) = parse_var::<bool>("VCONV_QUOTA_ENABLED") {
            self.quota_enabled = Some(v);
        }
    }

    /// Validate cross-field invariants.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(0) = self.max_concurrent_conversions {
            return Err(SettingsError::ZeroConcurrency);
        }
        let warn = self.threshold_warn.unwrap_or(80);
        let aggressive = self.threshold_aggressive.unwrap_or(90);
        let emergency = self.threshold_emergency.unwrap_or(95);
        if !(warn <= aggressive && aggressive < emergency && emergency <= 100) {
            return Err(SettingsError::ThresholdOrder {
                warn,
                aggressive,
                emergency,
            });
        }
        if let (Some(max), Some(reserved)) = (self.quota_max_bytes, self.quota_reserved_bytes) {
            if max <= reserved {
                return Err(SettingsError::QuotaOrder { max, reserved });
            }
        }
        Ok(())
    }

    /// Queue poll interval.
    #[must_use]
    pub fn effective_queue_check_interval(&self) -> Duration {
        Duration::from_secs(
            self.queue_check_interval_seconds
                .unwrap_or(DEFAULT_QUEUE_CHECK_INTERVAL_SECS),
        )
    }

    /// Scheduled cleanup interval.
    #[must_use]
    pub fn effective_cleanup_interval(&self) -> Duration {
        Duration::from_secs(
            60 * self
                .cleanup_interval_minutes
                .unwrap_or(DEFAULT_CLEANUP_INTERVAL_MINUTES),
        )
    }

    /// Progress update spacing.
    #[must_use]
    pub fn effective_progress_interval(&self) -> Duration {
        Duration::from_millis(
            self.progress_update_interval_ms
                .unwrap_or(DEFAULT_PROGRESS_UPDATE_INTERVAL_MS),
        )
    }

    /// Byte delta that forces a progress update.
    #[must_use]
    pub fn effective_progress_threshold_bytes(&self) -> u64 {
        self.progress_update_threshold_bytes
            .unwrap_or(DEFAULT_PROGRESS_UPDATE_THRESHOLD_BYTES)
    }

    /// FFmpeg binary to invoke.
    #[must_use]
    pub fn effective_ffmpeg_path(&self) -> PathBuf {
        self.ffmpeg_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffmpeg"))
    }

    /// FFprobe binary to invoke.
    #[must_use]
    pub fn effective_ffprobe_path(&self) -> PathBuf {
        self.ffprobe_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffprobe"))
    }
}

/// Settings validation / load error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot load config file {0}: {1}")]
    ConfigFile(PathBuf, String),

    #[error("maxConcurrentConversions must be at least 1")]
    ZeroConcurrency,

    #[error(
        "cleanup thresholds must satisfy warn <= aggressive < emergency <= 100, \
         got {warn}/{aggressive}/{emergency}"
    )]
    ThresholdOrder {
        warn: u8,
        aggressive: u8,
        emergency: u8,
    },

    #[error("quotaMaxBytes ({max}) must exceed quotaReservedBytes ({reserved})")]
    QuotaOrder { max: u64, reserved: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let settings = Settings {
            max_concurrent_conversions: Some(0),
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::ZeroConcurrency)
        ));
    }

    #[test]
    fn threshold_order_is_enforced() {
        let settings = Settings {
            threshold_warn: Some(95),
            threshold_aggressive: Some(90),
            threshold_emergency: Some(95),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn config_keys_are_camel_case() {
        let json = r#"{
            "uploadPath": "/data/uploads",
            "maxConcurrentConversions": 4,
            "progressUpdateIntervalMs": 100
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.upload_path.as_deref(), Some(Path::new("/data/uploads")));
        assert_eq!(settings.max_concurrent_conversions, Some(4));
        assert_eq!(
            settings.effective_progress_interval(),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn effective_accessors_fall_back_to_documented_defaults() {
        let settings = Settings::default();
        assert_eq!(
            settings.effective_queue_check_interval(),
            Duration::from_secs(10)
        );
        assert_eq!(
            settings.effective_progress_interval(),
            Duration::from_millis(200)
        );
        assert_eq!(
            settings.effective_progress_threshold_bytes(),
            5 * 1024 * 1024
        );
        assert_eq!(settings.effective_ffmpeg_path(), PathBuf::from("ffmpeg"));
    }
}
