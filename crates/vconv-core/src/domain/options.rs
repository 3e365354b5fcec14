//! Per-job conversion options.
//!
//! These are the recognized tuning knobs a client may attach to a job on top
//! of its preset. Every field is optional; a non-empty value wins over the
//! preset default when the argument vector is built.

use serde::{Deserialize, Serialize};

/// How `video_quality` should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum QualityMode {
    /// `video_quality` is a CRF value (e.g. `"23"`).
    #[default]
    #[serde(rename = "CRF")]
    Crf,
    /// `video_quality` is a target bitrate (e.g. `"4000k"`).
    Bitrate,
}

/// Hardware-acceleration selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HardwareAcceleration {
    /// Let the builder pick based on the configured encoder.
    #[default]
    Auto,
    /// Software encoding only.
    None,
    Nvidia,
    Intel,
    Amd,
    Vaapi,
}

/// The bag of per-job overrides recognized by the argument builder.
///
/// Serialized as JSON both on the wire (camelCase) and in the job row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversionOptions {
    /// Container override (`mp4`, `mkv`, `mp3`, ...).
    pub output_format: Option<String>,
    /// Named resolution (`1080p`, `720p`, `4k`, ...).
    pub resolution: Option<String>,
    /// Explicit output width; used with `custom_height`.
    pub custom_width: Option<u32>,
    /// Explicit output height; used with `custom_width`.
    pub custom_height: Option<u32>,
    /// Video encoder override (`libx264`, `h264_nvenc`, ...).
    pub video_codec: Option<String>,
    /// Audio encoder override (`aac`, `libmp3lame`, ...).
    pub audio_codec: Option<String>,
    /// Interpretation of `video_quality`.
    pub quality_mode: Option<QualityMode>,
    /// CRF value or `NNNNk` bitrate, per `quality_mode`.
    pub video_quality: Option<String>,
    /// Audio bitrate (`192k`).
    pub audio_bitrate: Option<String>,
    /// Audio sample rate in Hz.
    pub audio_sample_rate: Option<u32>,
    /// Audio channel count.
    pub audio_channels: Option<u32>,
    /// Output frame rate.
    pub frame_rate: Option<f64>,
    /// Encoder preset string (`fast`, `medium`, `p4`, ...).
    pub encoding_preset: Option<String>,
    /// Codec profile (`high`, `main`, ...).
    pub profile: Option<String>,
    /// Trim start (`HH:MM:SS` or seconds).
    pub start_time: Option<String>,
    /// Trim end.
    pub end_time: Option<String>,
    /// Maximum output duration in seconds.
    pub duration_limit: Option<f64>,
    /// Apply a deinterlace filter.
    pub deinterlace: Option<bool>,
    /// Denoise filter string (e.g. `hqdn3d=4:3:6:4`).
    pub denoise: Option<String>,
    /// Color space; defaults to `bt709` when unset.
    pub color_space: Option<String>,
    /// Pixel format; defaults to `yuv420p` when unset.
    pub pixel_format: Option<String>,
    /// Raw argument suffix appended verbatim before the output path.
    pub custom_params: Option<String>,
    /// Hardware-acceleration selector.
    pub hardware_acceleration: Option<HardwareAcceleration>,
    /// Extra filters appended to the coalesced `-vf` chain.
    pub video_filters: Option<String>,
    /// Extra filters appended to `-af`.
    pub audio_filters: Option<String>,
    /// Scheduler hint; the queue is currently FIFO.
    pub priority: Option<i32>,
    /// Reserved for retry support.
    pub max_retries: Option<u32>,
    /// Free-form metadata.
    pub tags: Option<Vec<String>>,
    /// Free-form metadata.
    pub notes: Option<String>,
    /// Two-pass encode.
    pub two_pass: Option<bool>,
    /// `-movflags +faststart` for mp4/mov output; defaults to true.
    pub fast_start: Option<bool>,
    /// `-copyts`; defaults to true.
    pub copy_timestamps: Option<bool>,
}

impl ConversionOptions {
    /// Effective fast-start flag (defaults on).
    #[must_use]
    pub fn fast_start_enabled(&self) -> bool {
        self.fast_start.unwrap_or(true)
    }

    /// Effective copy-timestamps flag (defaults on).
    #[must_use]
    pub fn copy_timestamps_enabled(&self) -> bool {
        self.copy_timestamps.unwrap_or(true)
    }

    /// Effective color space (defaults to `bt709`).
    #[must_use]
    pub fn effective_color_space(&self) -> &str {
        self.color_space.as_deref().unwrap_or("bt709")
    }

    /// Effective pixel format (defaults to `yuv420p`).
    #[must_use]
    pub fn effective_pixel_format(&self) -> &str {
        self.pixel_format.as_deref().unwrap_or("yuv420p")
    }

    /// Effective retry budget (defaults to 3; currently reserved).
    #[must_use]
    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(3)
    }
}
