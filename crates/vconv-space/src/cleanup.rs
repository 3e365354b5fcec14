//! Cleanup tiers and their retention plans.
//!
//! Every tier runs the same six categories; what varies is the retention
//! cutoff per category and, for manual runs, which categories are enabled.

use std::time::Duration;

use vconv_core::CleanupDetails;

use crate::config::SpaceConfig;

/// Per-category tally of one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryResult {
    /// Files removed.
    pub files: u64,
    /// Bytes reclaimed.
    pub bytes: u64,
}

impl CategoryResult {
    pub(crate) fn absorb(&mut self, other: Self) {
        self.files += other.files;
        self.bytes += other.bytes;
    }
}

/// Aggregate outcome of one cleanup pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupResult {
    /// Tier label (`scheduled`, `aggressive`, `emergency`, `manual`).
    pub cleanup_type: String,
    /// Total bytes reclaimed.
    pub cleaned_bytes: u64,
    /// Total files removed.
    pub cleaned_files: u64,
    /// Per-category file counts for the completion event.
    pub details: CleanupDetails,
}

/// Automatic cleanup tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTier {
    /// Hourly timer pass with configured retentions.
    Scheduled,
    /// Usage crossed the aggressive threshold; shortened retentions.
    Aggressive,
    /// Usage crossed the emergency threshold; everything eligible goes now.
    Emergency,
}

impl CleanupTier {
    /// Wire label for the completion event.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Aggressive => "aggressive",
            Self::Emergency => "emergency",
        }
    }
}

/// Category selection for a manual cleanup request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualCleanup {
    pub converted_sources: bool,
    pub downloaded_outputs: bool,
    pub temp_files: bool,
    pub failed_artifacts: bool,
    pub orphans: bool,
    pub logs: bool,
    /// Treat every enabled category as immediately eligible.
    pub ignore_retention: bool,
}

impl ManualCleanup {
    /// Every category, honoring configured retentions.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            converted_sources: true,
            downloaded_outputs: true,
            temp_files: true,
            failed_artifacts: true,
            orphans: true,
            logs: true,
            ignore_retention: false,
        }
    }

    /// No categories; callers enable what they need.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            converted_sources: false,
            downloaded_outputs: false,
            temp_files: false,
            failed_artifacts: false,
            orphans: false,
            logs: false,
            ignore_retention: false,
        }
    }
}

/// How the downloaded-outputs category selects records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadedCleanup {
    /// Honor each record's `scheduled_delete_at`.
    Schedule,
    /// Reclaim every record downloaded longer than this ago.
    MaxAge(Duration),
    /// Category disabled for this pass.
    Off,
}

/// Resolved retentions and category switches for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPlan {
    pub label: &'static str,
    /// `None` disables a category for this pass.
    pub converted: Option<Duration>,
    pub downloaded: DownloadedCleanup,
    pub temp: Option<Duration>,
    pub failed: Option<Duration>,
    pub orphan: Option<Duration>,
    pub log: Option<Duration>,
}

impl CleanupPlan {
    /// Plan for an automatic tier.
    #[must_use]
    pub fn for_tier(tier: CleanupTier, config: &SpaceConfig) -> Self {
        let retention = &config.retention;
        match tier {
            CleanupTier::Scheduled => Self {
                label: tier.label(),
                converted: Some(retention.converted),
                downloaded: DownloadedCleanup::Schedule,
                temp: Some(retention.temp),
                failed: Some(retention.failed),
                orphan: Some(retention.orphan),
                log: Some(retention.log),
            },
            CleanupTier::Aggressive => Self {
                label: tier.label(),
                converted: Some(retention.converted),
                downloaded: DownloadedCleanup::MaxAge(Duration::from_secs(6 * 3600)),
                temp: Some(Duration::from_secs(30 * 60)),
                failed: Some(retention.failed),
                orphan: Some(Duration::from_secs(6 * 3600)),
                log: Some(Duration::from_secs(7 * 24 * 3600)),
            },
            CleanupTier::Emergency => Self {
                label: tier.label(),
                converted: Some(Duration::ZERO),
                downloaded: DownloadedCleanup::MaxAge(Duration::ZERO),
                temp: Some(Duration::ZERO),
                failed: Some(Duration::ZERO),
                orphan: Some(Duration::ZERO),
                log: Some(Duration::ZERO),
            },
        }
    }

    /// Plan for a manual request.
    #[must_use]
    pub fn manual(options: ManualCleanup, config: &SpaceConfig) -> Self {
        let retention = &config.retention;
        let pick = |enabled: bool, configured: Duration| {
            enabled.then_some(if options.ignore_retention {
                Duration::ZERO
            } else {
                configured
            })
        };
        Self {
            label: "manual",
            converted: pick(options.converted_sources, retention.converted),
            downloaded: if !options.downloaded_outputs {
                DownloadedCleanup::Off
            } else if options.ignore_retention {
                DownloadedCleanup::MaxAge(Duration::ZERO)
            } else {
                DownloadedCleanup::Schedule
            },
            temp: pick(options.temp_files, retention.temp),
            failed: pick(options.failed_artifacts, retention.failed),
            orphan: pick(options.orphans, retention.orphan),
            log: pick(options.logs, retention.log),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config() -> SpaceConfig {
        SpaceConfig::for_data_dir(Path::new("/data"))
    }

    #[test]
    fn emergency_plan_zeroes_every_retention() {
        let plan = CleanupPlan::for_tier(CleanupTier::Emergency, &config());
        assert_eq!(plan.converted, Some(Duration::ZERO));
        assert_eq!(plan.temp, Some(Duration::ZERO));
        assert_eq!(plan.downloaded, DownloadedCleanup::MaxAge(Duration::ZERO));
        assert_eq!(plan.log, Some(Duration::ZERO));
    }

    #[test]
    fn aggressive_plan_shortens_temp_downloaded_orphan() {
        let plan = CleanupPlan::for_tier(CleanupTier::Aggressive, &config());
        assert_eq!(plan.temp, Some(Duration::from_secs(1800)));
        assert_eq!(
            plan.downloaded,
            DownloadedCleanup::MaxAge(Duration::from_secs(21_600))
        );
        assert_eq!(plan.orphan, Some(Duration::from_secs(21_600)));
        assert_eq!(plan.log, Some(Duration::from_secs(604_800)));
        // Untouched categories keep configured retentions.
        assert_eq!(plan.converted, Some(Duration::from_secs(300)));
    }

    #[test]
    fn manual_plan_respects_category_flags() {
        let options = ManualCleanup {
            temp_files: true,
            logs: true,
            ..ManualCleanup::none()
        };
        let plan = CleanupPlan::manual(options, &config());
        assert!(plan.converted.is_none());
        assert_eq!(plan.downloaded, DownloadedCleanup::Off);
        assert!(plan.temp.is_some());
        assert!(plan.log.is_some());
    }

    #[test]
    fn manual_ignore_retention_zeroes_enabled_categories() {
        let options = ManualCleanup {
            ignore_retention: true,
            ..ManualCleanup::all()
        };
        let plan = CleanupPlan::manual(options, &config());
        assert_eq!(plan.temp, Some(Duration::ZERO));
        assert_eq!(plan.downloaded, DownloadedCleanup::MaxAge(Duration::ZERO));
    }
}
