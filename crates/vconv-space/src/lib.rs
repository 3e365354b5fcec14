//! Disk-space management for the vconv transcoding service.
//!
//! Four cooperating pieces:
//!
//! - [`UsageTracker`] — atomic accounting buckets over the managed
//!   directory trees, with serialized full measurements.
//! - [`SpaceGovernor`] — quota admission, the periodic monitor loop, and
//!   the tiered cleanup passes (scheduled / aggressive / emergency /
//!   manual).
//! - [`RetentionTracker`] — download tracking with persistent
//!   scheduled deletes and a catch-up sweeper.
//! - [`SpaceEstimator`] — output/temp size prediction for admission and
//!   batch registration, with observation-based calibration.
//!
//! The governor publishes warnings and telemetry through the notification
//! bus; it never pauses running jobs.

mod cleanup;
mod config;
mod error;
mod estimate;
mod governor;
mod retention;
mod usage;

pub use cleanup::{
    CategoryResult, CleanupPlan, CleanupResult, CleanupTier, DownloadedCleanup, ManualCleanup,
};
pub use config::{RetentionConfig, SpaceConfig, Thresholds};
pub use error::SpaceError;
pub use estimate::{EstimateInput, QualityTier, SpaceEstimate, SpaceEstimator};
pub use governor::SpaceGovernor;
pub use retention::{DEFAULT_RETENTION_HOURS, RetentionTracker};
pub use usage::UsageTracker;
