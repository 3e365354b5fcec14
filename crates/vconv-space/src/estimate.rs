//! Output-size prediction for admission control and batch registration.
//!
//! The model is deliberately coarse: a per-codec base compression ratio,
//! scaled by bitrate, container, resolution, and quality multipliers, with a
//! sanity clamp so a pathological input can never produce an absurd
//! requirement. Observed results feed back into the codec table.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Fallback compression ratio for unknown codecs.
const DEFAULT_RATIO: f64 = 0.70;

/// Weight of a new observation when calibrating a codec ratio.
const CALIBRATION_WEIGHT: f64 = 0.30;

/// Assumed content length when deriving the original bitrate from file size.
const ASSUMED_DURATION_SECS: f64 = 1800.0;

/// Assumed audio share subtracted from the derived original bitrate (kbps).
const ASSUMED_AUDIO_KBPS: f64 = 128.0;

/// Temp requirement: chunk staging + encoder scratch + cache/logs.
const TEMP_FACTOR: f64 = 1.25;

/// Quality tier used when no explicit bitrate is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
    Ultra,
}

impl QualityTier {
    const fn multiplier(self) -> f64 {
        match self {
            Self::Low => 0.8,
            Self::Medium => 1.0,
            Self::High => 1.2,
            Self::Ultra => 1.4,
        }
    }
}

/// Encode parameters the estimator cares about.
#[derive(Debug, Clone, Default)]
pub struct EstimateInput {
    /// Target video codec name (substring matching).
    pub video_codec: Option<String>,
    /// Target container.
    pub container: Option<String>,
    /// Target resolution name (`1080p`, `4k`, ...).
    pub resolution: Option<String>,
    /// Requested video bitrate in kbps, when quality mode is bitrate.
    pub video_bitrate_kbps: Option<u64>,
    /// Quality tier used when no bitrate is requested.
    pub quality: Option<QualityTier>,
}

/// Predicted space requirement for one job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceEstimate {
    /// Predicted output file size.
    pub estimated_output_bytes: u64,
    /// Predicted transient requirement while encoding.
    pub temp_bytes: u64,
    /// Sum used for admission.
    pub total_required_bytes: u64,
    /// Effective compression ratio after all multipliers and clamps.
    pub compression_ratio: f64,
}

/// Space estimator with a calibrating codec table.
pub struct SpaceEstimator {
    ratios: RwLock<HashMap<String, f64>>,
}

impl Default for SpaceEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl SpaceEstimator {
    /// Create an estimator seeded with the built-in codec table.
    #[must_use]
    pub fn new() -> Self {
        let seed: [(&str, f64); 10] = [
            ("h264_nvenc", 0.65),
            ("hevc_nvenc", 0.55),
            ("libx264", 0.70),
            ("libx265", 0.50),
            ("av1", 0.38),
            ("libsvtav1", 0.38),
            ("vp9", 0.45),
            ("libvpx-vp9", 0.45),
            ("mpeg4", 0.90),
            ("gif", 1.80),
        ];
        Self {
            ratios: RwLock::new(
                seed.iter()
                    .map(|(codec, ratio)| ((*codec).to_string(), *ratio))
                    .collect(),
            ),
        }
    }

    fn base_ratio(&self, codec: Option<&str>) -> f64 {
        let Some(codec) = codec else {
            return DEFAULT_RATIO;
        };
        let codec = codec.to_ascii_lowercase();
        let ratios = self.ratios.read().expect("ratio table poisoned");
        // Exact hit first, then substring (h264_nvenc matches "nvenc" presets).
        if let Some(ratio) = ratios.get(&codec) {
            return *ratio;
        }
        ratios
            .iter()
            .find(|(name, _)| codec.contains(name.as_str()) || name.contains(&codec))
            .map_or(DEFAULT_RATIO, |(_, ratio)| *ratio)
    }

    /// Predict the space requirement for converting `input_bytes`.
    #[must_use]
    pub fn estimate(&self, input_bytes: u64, input: &EstimateInput) -> SpaceEstimate {
        let mut ratio = self.base_ratio(input.video_codec.as_deref());

        // Requested bitrate scales the ratio relative to the (derived)
        // original bitrate, clamped so outliers cannot dominate.
        if let Some(kbps) = input.video_bitrate_kbps {
            let original_kbps = estimated_original_bitrate_kbps(input_bytes);
            let scale = (kbps as f64 / original_kbps).clamp(0.2, 2.0);
            ratio *= scale;
        } else if let Some(quality) = input.quality {
            ratio *= quality.multiplier();
        }

        ratio *= container_overhead(input.container.as_deref());
        ratio *= resolution_multiplier(input.resolution.as_deref());

        let (clamp_min, clamp_max) = clamp_bounds(
            input.video_codec.as_deref(),
            input.container.as_deref(),
        );
        ratio = ratio.clamp(clamp_min, clamp_max);

        let estimated_output_bytes = (input_bytes as f64 * ratio).round() as u64;
        let temp_bytes = (input_bytes as f64 * TEMP_FACTOR).round() as u64;

        SpaceEstimate {
            estimated_output_bytes,
            temp_bytes,
            total_required_bytes: estimated_output_bytes + temp_bytes,
            compression_ratio: ratio,
        }
    }

    /// Calibrate a codec's base ratio toward an observed result.
    pub fn record_actual(&self, codec: &str, input_bytes: u64, actual_output_bytes: u64) {
        if input_bytes == 0 {
            return;
        }
        let observed = actual_output_bytes as f64 / input_bytes as f64;
        let codec = codec.to_ascii_lowercase();
        let mut ratios = self.ratios.write().expect("ratio table poisoned");
        let entry = ratios.entry(codec.clone()).or_insert(DEFAULT_RATIO);
        *entry = (1.0 - CALIBRATION_WEIGHT) * *entry + CALIBRATION_WEIGHT * observed;
        tracing::debug!(codec = %codec, observed, updated = *entry, "calibrated codec ratio");
    }
}

fn estimated_original_bitrate_kbps(input_bytes: u64) -> f64 {
    let raw = input_bytes as f64 * 8.0 / ASSUMED_DURATION_SECS / 1000.0 - ASSUMED_AUDIO_KBPS;
    raw.max(500.0)
}

fn container_overhead(container: Option<&str>) -> f64 {
    match container.map(str::to_ascii_lowercase).as_deref() {
        Some("mkv") => 1.05,
        Some("avi") => 1.08,
        Some("webm") => 1.03,
        Some("flv") => 1.04,
        _ => 1.02,
    }
}

fn resolution_multiplier(resolution: Option<&str>) -> f64 {
    match resolution.map(str::to_ascii_lowercase).as_deref() {
        Some("8k" | "4320p") => 2.0,
        Some("4k" | "2160p") => 1.5,
        Some("1440p" | "2k") => 1.2,
        Some("1080p") => 1.0,
        Some("720p") => 0.7,
        Some("480p") => 0.5,
        Some("360p") => 0.35,
        _ => 1.0,
    }
}

/// Sanity bounds on the final ratio; lossless codecs and GIF can legitimately
/// grow the file.
fn clamp_bounds(codec: Option<&str>, container: Option<&str>) -> (f64, f64) {
    let codec = codec.map(str::to_ascii_lowercase).unwrap_or_default();
    let container = container.map(str::to_ascii_lowercase).unwrap_or_default();
    if container == "gif" || codec == "gif" {
        return (0.1, 5.0);
    }
    let lossless = ["ffv1", "huffyuv", "utvideo", "rawvideo", "prores"]
        .iter()
        .any(|name| codec.contains(name));
    if lossless {
        return (0.1, 3.0);
    }
    (0.1, 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn estimate_stays_within_sanity_bounds() {
        let estimator = SpaceEstimator::new();
        let inputs = [
            EstimateInput::default(),
            EstimateInput {
                video_codec: Some("libx265".into()),
                resolution: Some("8k".into()),
                quality: Some(QualityTier::Ultra),
                ..EstimateInput::default()
            },
            EstimateInput {
                video_codec: Some("av1".into()),
                resolution: Some("360p".into()),
                quality: Some(QualityTier::Low),
                ..EstimateInput::default()
            },
            EstimateInput {
                video_bitrate_kbps: Some(100_000),
                ..EstimateInput::default()
            },
        ];
        for input in &inputs {
            let estimate = estimator.estimate(100 * MIB, input);
            assert!(estimate.estimated_output_bytes >= 10 * MIB);
            assert!(estimate.estimated_output_bytes <= 200 * MIB);
        }
    }

    #[test]
    fn gif_output_may_grow_beyond_double() {
        let estimator = SpaceEstimator::new();
        let estimate = estimator.estimate(
            100 * MIB,
            &EstimateInput {
                container: Some("gif".into()),
                video_codec: Some("gif".into()),
                resolution: Some("8k".into()),
                ..EstimateInput::default()
            },
        );
        assert!(estimate.compression_ratio > 2.0);
        assert!(estimate.compression_ratio <= 5.0);
    }

    #[test]
    fn temp_requirement_is_a_quarter_above_input() {
        let estimator = SpaceEstimator::new();
        let estimate = estimator.estimate(100 * MIB, &EstimateInput::default());
        assert_eq!(estimate.temp_bytes, 125 * MIB);
        assert_eq!(
            estimate.total_required_bytes,
            estimate.estimated_output_bytes + estimate.temp_bytes
        );
    }

    #[test]
    fn low_bitrate_request_shrinks_the_estimate() {
        let estimator = SpaceEstimator::new();
        let base = estimator.estimate(500 * MIB, &EstimateInput::default());
        let constrained = estimator.estimate(
            500 * MIB,
            &EstimateInput {
                video_bitrate_kbps: Some(400),
                ..EstimateInput::default()
            },
        );
        assert!(constrained.estimated_output_bytes < base.estimated_output_bytes);
    }

    #[test]
    fn derived_original_bitrate_has_a_floor() {
        assert_eq!(estimated_original_bitrate_kbps(0), 500.0);
        assert!(estimated_original_bitrate_kbps(10_000 * MIB) > 500.0);
    }

    #[test]
    fn calibration_moves_ratio_toward_observation() {
        let estimator = SpaceEstimator::new();
        let before = estimator.base_ratio(Some("libx264"));
        // Observe a much better compression than the table assumes.
        estimator.record_actual("libx264", 100 * MIB, 35 * MIB);
        let after = estimator.base_ratio(Some("libx264"));
        assert!(after < before);
        let expected = 0.7 * before + 0.3 * 0.35;
        assert!((after - expected).abs() < 1e-9);
    }

    #[test]
    fn unknown_codec_uses_default_ratio() {
        let estimator = SpaceEstimator::new();
        assert_eq!(estimator.base_ratio(Some("mystery")), DEFAULT_RATIO);
        assert_eq!(estimator.base_ratio(None), DEFAULT_RATIO);
    }
}
