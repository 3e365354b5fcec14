//! Engine timing and concurrency configuration.

use std::path::PathBuf;
use std::time::Duration;

use vconv_core::Settings;

/// Resolved engine configuration.
///
/// Built from [`Settings`] once at startup; the dispatcher and runner only
/// see this struct.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// FFmpeg binary.
    pub ffmpeg_path: PathBuf,
    /// FFprobe binary.
    pub ffprobe_path: PathBuf,
    /// Worker-pool bound (live encoder processes).
    pub max_concurrent: usize,
    /// Queue poll interval.
    pub poll_interval: Duration,
    /// Backoff after a persistent store failure in the poll loop.
    pub store_retry_backoff: Duration,
    /// Minimum spacing between persisted/published progress updates.
    pub progress_interval: Duration,
    /// Progress-percentage step that forces an update regardless of spacing.
    pub progress_percent_step: u8,
    /// Cancel a job when the encoder emits nothing for this long.
    pub stall_timeout: Duration,
    /// Grace between SIGTERM and SIGKILL on forced termination.
    pub kill_grace: Duration,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            max_concurrent: num_cpus::get().max(1),
            poll_interval: Duration::from_secs(10),
            store_retry_backoff: Duration::from_secs(30),
            progress_interval: Duration::from_millis(200),
            progress_percent_step: 5,
            stall_timeout: Duration::from_secs(600),
            kill_grace: Duration::from_secs(3),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Resolve from service settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg_path: settings.effective_ffmpeg_path(),
            ffprobe_path: settings.effective_ffprobe_path(),
            max_concurrent: settings
                .max_concurrent_conversions
                .map_or(defaults.max_concurrent, |n| n.max(1) as usize),
            poll_interval: settings.effective_queue_check_interval(),
            progress_interval: settings.effective_progress_interval(),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert!(config.max_concurrent >= 1);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.progress_interval, Duration::from_millis(200));
        assert_eq!(config.progress_percent_step, 5);
        assert_eq!(config.stall_timeout, Duration::from_secs(600));
        assert_eq!(config.kill_grace, Duration::from_secs(3));
        assert!(config.shutdown_timeout >= Duration::from_secs(5));
    }

    #[test]
    fn settings_override_binary_paths_and_bounds() {
        let settings = Settings {
            ffmpeg_path: Some("/opt/ffmpeg/bin/ffmpeg".into()),
            max_concurrent_conversions: Some(2),
            queue_check_interval_seconds: Some(1),
            ..Settings::default()
        };
        let config = EngineConfig::from_settings(&settings);
        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }
}
