//! The static preset library.
//!
//! A preset is a named bundle of encoder defaults; per-job overrides win
//! field by field when the argument vector is built.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// A named bundle of default encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    /// Display name and selector.
    pub name: String,
    /// Output container.
    pub container: String,
    /// Video encoder; `None` for audio-only presets.
    pub video_codec: Option<String>,
    /// Audio encoder; `None` for silent output (e.g. GIF).
    pub audio_codec: Option<String>,
    /// Constant-rate-factor default.
    pub crf: Option<u32>,
    /// Target video bitrate (`4000k`); used instead of CRF when set.
    pub video_bitrate: Option<String>,
    /// Target audio bitrate.
    pub audio_bitrate: Option<String>,
    /// Encoder preset string (`veryfast`, `slow`, ...).
    pub encoding_preset: Option<String>,
    /// Codec profile.
    pub profile: Option<String>,
    /// Named output resolution (`1080p`, ...); `None` keeps the source size.
    pub resolution: Option<String>,
    /// Output frame rate.
    pub frame_rate: Option<f64>,
    /// Pixel format.
    pub pixel_format: Option<String>,
    /// Color space.
    pub color_space: Option<String>,
    /// Add `-movflags +faststart` for mp4/mov.
    pub fast_start: bool,
    /// Add `-copyts`.
    pub copy_timestamps: bool,
    /// Two-pass encode (only meaningful with a bitrate target).
    pub two_pass: bool,
    /// Denoise filter inserted into the video filter chain.
    pub denoise: Option<String>,
    /// Deinterlace via `yadif`.
    pub deinterlace: bool,
}

impl Preset {
    fn base(name: &str, container: &str) -> Self {
        Self {
            name: name.to_string(),
            container: container.to_string(),
            video_codec: Some("libx264".to_string()),
            audio_codec: Some("aac".to_string()),
            crf: Some(23),
            video_bitrate: None,
            audio_bitrate: Some("128k".to_string()),
            encoding_preset: Some("medium".to_string()),
            profile: None,
            resolution: None,
            frame_rate: None,
            pixel_format: Some("yuv420p".to_string()),
            color_space: Some("bt709".to_string()),
            fast_start: true,
            copy_timestamps: true,
            two_pass: false,
            denoise: None,
            deinterlace: false,
        }
    }
}

fn library() -> &'static Vec<Preset> {
    static LIBRARY: OnceLock<Vec<Preset>> = OnceLock::new();
    LIBRARY.get_or_init(|| {
        vec![
            Preset {
                encoding_preset: Some("veryfast".to_string()),
                resolution: Some("1080p".to_string()),
                frame_rate: Some(30.0),
                ..Preset::base("Fast 1080p30", "mp4")
            },
            Preset {
                crf: Some(18),
                encoding_preset: Some("slow".to_string()),
                profile: Some("high".to_string()),
                resolution: Some("1080p".to_string()),
                ..Preset::base("High Quality 1080p", "mp4")
            },
            Preset {
                resolution: Some("720p".to_string()),
                audio_bitrate: Some("96k".to_string()),
                ..Preset::base("Web Optimized 720p", "mp4")
            },
            Preset {
                video_codec: Some("libx265".to_string()),
                crf: Some(20),
                encoding_preset: Some("slow".to_string()),
                resolution: Some("4k".to_string()),
                audio_bitrate: Some("192k".to_string()),
                ..Preset::base("4K Ultra", "mp4")
            },
            Preset {
                video_codec: None,
                audio_codec: Some("libmp3lame".to_string()),
                crf: None,
                audio_bitrate: Some("192k".to_string()),
                encoding_preset: None,
                pixel_format: None,
                color_space: None,
                fast_start: false,
                ..Preset::base("Audio Only MP3", "mp3")
            },
            Preset {
                video_codec: Some("gif".to_string()),
                audio_codec: None,
                crf: None,
                encoding_preset: None,
                resolution: Some("480p".to_string()),
                frame_rate: Some(12.0),
                pixel_format: None,
                color_space: None,
                fast_start: false,
                copy_timestamps: false,
                ..Preset::base("GIF Preview", "gif")
            },
        ]
    })
}

/// All presets, in display order.
#[must_use]
pub fn all_presets() -> &'static [Preset] {
    library().as_slice()
}

/// The preset used when a request names none.
#[must_use]
pub fn get_default() -> &'static Preset {
    &library()[0]
}

/// Look up a preset by name (case-insensitive).
#[must_use]
pub fn get_by_name(name: &str) -> Option<&'static Preset> {
    library()
        .iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(name))
}
