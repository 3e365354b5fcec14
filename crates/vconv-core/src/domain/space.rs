//! Disk-space accounting singletons and admission results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One gibibyte, the floor for quota values.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Storage quota configuration (single row in the store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceQuota {
    /// Hard ceiling for managed storage.
    pub max_total_bytes: u64,
    /// Bytes held back from admission (headroom for in-flight encodes).
    pub reserved_bytes: u64,
    /// When false, every admission check passes.
    pub enabled: bool,
    /// Last configuration change.
    pub updated_at: DateTime<Utc>,
}

impl Default for SpaceQuota {
    fn default() -> Self {
        Self {
            max_total_bytes: 100 * GIB,
            reserved_bytes: 5 * GIB,
            enabled: true,
            updated_at: Utc::now(),
        }
    }
}

impl SpaceQuota {
    /// Validate the quota invariants: `max > reserved >= 1 GiB`.
    pub fn validate(&self) -> Result<(), QuotaConfigError> {
        if self.reserved_bytes < GIB {
            return Err(QuotaConfigError::ReservedTooSmall(self.reserved_bytes));
        }
        if self.max_total_bytes <= self.reserved_bytes {
            return Err(QuotaConfigError::MaxNotAboveReserved {
                max: self.max_total_bytes,
                reserved: self.reserved_bytes,
            });
        }
        Ok(())
    }
}

/// Quota configuration validation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QuotaConfigError {
    #[error("reserved space must be at least 1 GiB, got {0} bytes")]
    ReservedTooSmall(u64),

    #[error("max total space ({max}) must exceed reserved space ({reserved})")]
    MaxNotAboveReserved { max: u64, reserved: u64 },
}

/// Measured usage of the three managed directory trees (single row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceUsage {
    /// Bytes under the uploads directory.
    pub uploads_bytes: u64,
    /// Bytes under the outputs directory.
    pub outputs_bytes: u64,
    /// Bytes under the temp directory.
    pub temp_bytes: u64,
    /// When the last full measurement ran.
    pub last_measured_at: DateTime<Utc>,
}

impl Default for SpaceUsage {
    fn default() -> Self {
        Self {
            uploads_bytes: 0,
            outputs_bytes: 0,
            temp_bytes: 0,
            last_measured_at: Utc::now(),
        }
    }
}

impl SpaceUsage {
    /// Sum of all three buckets.
    #[must_use]
    pub const fn total_used(&self) -> u64 {
        self.uploads_bytes + self.outputs_bytes + self.temp_bytes
    }
}

/// The three logical usage buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageBucket {
    /// Input files delivered by the upload surface.
    Uploads,
    /// Converted output files.
    Outputs,
    /// Chunk scratch and transient encoder files.
    Temp,
}

/// Result of a space admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceCheck {
    /// Whether the requirement fits inside the quota.
    pub sufficient: bool,
    /// Bytes the caller asked for.
    pub required_bytes: u64,
    /// Bytes available under the quota after reservation.
    pub available_bytes: u64,
    /// `required - available` when insufficient, else `0`.
    pub shortfall_bytes: u64,
}

impl SpaceCheck {
    /// Compute an admission result from quota parameters and current usage.
    #[must_use]
    pub fn evaluate(quota: &SpaceQuota, used_bytes: u64, required_bytes: u64) -> Self {
        if !quota.enabled {
            return Self {
                sufficient: true,
                required_bytes,
                available_bytes: u64::MAX,
                shortfall_bytes: 0,
            };
        }
        let available_bytes = quota
            .max_total_bytes
            .saturating_sub(used_bytes)
            .saturating_sub(quota.reserved_bytes);
        let sufficient = required_bytes <= available_bytes;
        Self {
            sufficient,
            required_bytes,
            available_bytes,
            shortfall_bytes: required_bytes.saturating_sub(available_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_quota_is_valid() {
        SpaceQuota::default().validate().unwrap();
    }

    #[test]
    fn quota_rejects_reserved_below_one_gib() {
        let quota = SpaceQuota {
            reserved_bytes: GIB - 1,
            ..SpaceQuota::default()
        };
        assert!(matches!(
            quota.validate(),
            Err(QuotaConfigError::ReservedTooSmall(_))
        ));
    }

    #[test]
    fn quota_rejects_max_at_or_below_reserved() {
        let quota = SpaceQuota {
            max_total_bytes: 2 * GIB,
            reserved_bytes: 2 * GIB,
            ..SpaceQuota::default()
        };
        assert!(quota.validate().is_err());
    }

    #[test]
    fn admission_reports_shortfall() {
        let quota = SpaceQuota {
            max_total_bytes: 10 * GIB,
            reserved_bytes: 5 * GIB,
            enabled: true,
            updated_at: Utc::now(),
        };
        // 4.9 GiB used leaves ~0.1 GiB of admissible space.
        let used = 5_261_334_938;
        let check = SpaceCheck::evaluate(&quota, used, GIB);
        assert!(!check.sufficient);
        assert!(check.shortfall_bytes > 0);
    }

    #[test]
    fn disabled_quota_always_admits() {
        let quota = SpaceQuota {
            enabled: false,
            ..SpaceQuota::default()
        };
        let check = SpaceCheck::evaluate(&quota, u64::MAX / 2, u64::MAX / 2);
        assert!(check.sufficient);
        assert_eq!(check.shortfall_bytes, 0);
    }

    #[test]
    fn usage_total_sums_buckets() {
        let usage = SpaceUsage {
            uploads_bytes: 1,
            outputs_bytes: 2,
            temp_bytes: 3,
            last_measured_at: Utc::now(),
        };
        assert_eq!(usage.total_used(), 6);
    }
}
