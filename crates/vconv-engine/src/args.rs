//! FFmpeg argument construction.
//!
//! Merges a preset with per-job overrides (non-empty override wins) and
//! emits the argument vector
//! `-y -progress pipe:2 [hw] -i <input> [video] [audio] [filters] [muxer] <output>`.
//! Hardware-acceleration flags always precede `-i`; everything else follows.

use std::path::Path;

use vconv_core::{ConversionOptions, HardwareAcceleration, Job, QualityMode};

use crate::presets::Preset;

/// Containers that carry no video stream; they force `-vn` and suppress all
/// video options.
const AUDIO_CONTAINERS: [&str; 6] = ["mp3", "aac", "flac", "wav", "ogg", "m4a"];

/// GPU encoder families the builder knows codec-specific options for.
const GPU_FAMILIES: [&str; 4] = ["nvenc", "qsv", "amf", "vaapi"];

/// A ready-to-spawn encoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodePlan {
    /// Arguments of the (final) encode pass.
    pub args: Vec<String>,
    /// First-pass arguments when this is a two-pass encode.
    pub first_pass: Option<Vec<String>>,
    /// Effective container.
    pub container: String,
    /// Effective video codec, when the output has video.
    pub video_codec: Option<String>,
}

/// Build the invocation for `job` on top of `preset`.
#[must_use]
pub fn build(preset: &Preset, job: &Job) -> EncodePlan {
    let opts = &job.overrides;
    let container = effective(&opts.output_format, &Some(preset.container.clone()))
        .unwrap_or_else(|| "mp4".to_string());
    let audio_only = AUDIO_CONTAINERS.contains(&container.as_str());
    let video_codec = if audio_only {
        None
    } else {
        effective(&opts.video_codec, &preset.video_codec).or(Some("libx264".to_string()))
    };

    let two_pass_requested = opts.two_pass.unwrap_or(preset.two_pass);
    let (quality_mode, quality_value) = resolve_quality(preset, opts);
    // Two-pass only makes sense against a bitrate target.
    let two_pass = two_pass_requested
        && !audio_only
        && quality_mode == QualityMode::Bitrate
        && quality_value.is_some();

    let mut args = head_args(opts, video_codec.as_deref(), &job.input_path);
    push_trim_args(&mut args, opts);

    if audio_only {
        args.push("-vn".to_string());
    } else {
        push_video_args(
            &mut args,
            preset,
            opts,
            video_codec.as_deref().unwrap_or("libx264"),
            quality_mode,
            quality_value.as_deref(),
            &container,
        );
    }
    push_audio_args(&mut args, preset, opts, &container);

    if !audio_only && opts.copy_timestamps.unwrap_or(preset.copy_timestamps) {
        args.push("-copyts".to_string());
    }
    if matches!(container.as_str(), "mp4" | "mov")
        && opts.fast_start.unwrap_or(preset.fast_start)
    {
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
    }
    if let Some(custom) = &opts.custom_params {
        args.extend(custom.split_whitespace().map(str::to_string));
    }

    let first_pass = two_pass.then(|| {
        let mut first = args.clone();
        let passlog = job.output_path.with_extension("passlog");
        first.extend([
            "-pass".to_string(),
            "1".to_string(),
            "-passlogfile".to_string(),
            passlog.to_string_lossy().into_owned(),
            "-an".to_string(),
            "-f".to_string(),
            "null".to_string(),
            null_sink().to_string(),
        ]);
        first
    });
    if two_pass {
        let passlog = job.output_path.with_extension("passlog");
        args.extend([
            "-pass".to_string(),
            "2".to_string(),
            "-passlogfile".to_string(),
            passlog.to_string_lossy().into_owned(),
        ]);
    }

    args.push(job.output_path.to_string_lossy().into_owned());

    EncodePlan {
        args,
        first_pass,
        container,
        video_codec,
    }
}

/// `-y -progress pipe:2 [hw] -i <input>`.
fn head_args(opts: &ConversionOptions, video_codec: Option<&str>, input: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-progress".to_string(),
        "pipe:2".to_string(),
    ];
    args.extend(hw_accel_args(
        opts.hardware_acceleration.unwrap_or_default(),
        video_codec,
    ));
    args.push("-i".to_string());
    args.push(input.to_string_lossy().into_owned());
    args
}

fn push_trim_args(args: &mut Vec<String>, opts: &ConversionOptions) {
    if let Some(start) = &opts.start_time {
        args.push("-ss".to_string());
        args.push(start.clone());
    }
    if let Some(end) = &opts.end_time {
        args.push("-to".to_string());
        args.push(end.clone());
    }
    if let Some(limit) = opts.duration_limit {
        args.push("-t".to_string());
        args.push(format_seconds(limit));
    }
}

#[allow(clippy::too_many_arguments)]
fn push_video_args(
    args: &mut Vec<String>,
    preset: &Preset,
    opts: &ConversionOptions,
    codec: &str,
    quality_mode: QualityMode,
    quality_value: Option<&str>,
    container: &str,
) {
    args.push("-c:v".to_string());
    args.push(codec.to_string());

    if let Some(value) = quality_value {
        match quality_mode {
            QualityMode::Bitrate => {
                args.push("-b:v".to_string());
                args.push(value.to_string());
            }
            QualityMode::Crf => {
                let (flag, emit) = crf_flag(codec);
                if emit {
                    args.push(flag.to_string());
                    args.push(value.to_string());
                }
            }
        }
    }

    if let Some(enc_preset) = effective(&opts.encoding_preset, &preset.encoding_preset) {
        if supports_preset_flag(codec) {
            args.push("-preset".to_string());
            args.push(enc_preset);
        }
    }
    if let Some(profile) = effective(&opts.profile, &preset.profile) {
        args.push("-profile:v".to_string());
        args.push(profile);
    }

    // GIF palettes and raw formats pick their own layout.
    if container != "gif" {
        if let Some(pix_fmt) = effective(&opts.pixel_format, &preset.pixel_format) {
            args.push("-pix_fmt".to_string());
            args.push(pix_fmt);
        }
        if let Some(color) = effective(&opts.color_space, &preset.color_space) {
            args.push("-colorspace".to_string());
            args.push(color);
        }
    }

    let filters = video_filter_chain(preset, opts);
    if !filters.is_empty() {
        args.push("-vf".to_string());
        args.push(filters.join(","));
    }
}

fn push_audio_args(
    args: &mut Vec<String>,
    preset: &Preset,
    opts: &ConversionOptions,
    container: &str,
) {
    if container == "gif" {
        args.push("-an".to_string());
        return;
    }
    let codec = effective(&opts.audio_codec, &preset.audio_codec);
    let Some(codec) = codec else {
        args.push("-an".to_string());
        return;
    };
    args.push("-c:a".to_string());
    args.push(codec);
    if let Some(bitrate) = effective(&opts.audio_bitrate, &preset.audio_bitrate) {
        args.push("-b:a".to_string());
        args.push(bitrate);
    }
    if let Some(rate) = opts.audio_sample_rate {
        args.push("-ar".to_string());
        args.push(rate.to_string());
    }
    if let Some(channels) = opts.audio_channels {
        args.push("-ac".to_string());
        args.push(channels.to_string());
    }
    if let Some(filters) = &opts.audio_filters {
        args.push("-af".to_string());
        args.push(filters.clone());
    }
}

/// Coalesce scaling, frame rate, deinterlace, denoise, and extra filters
/// into one `-vf` chain.
fn video_filter_chain(preset: &Preset, opts: &ConversionOptions) -> Vec<String> {
    let mut filters = Vec::new();

    let dims = match (opts.custom_width, opts.custom_height) {
        (Some(width), Some(height)) => Some((width, height)),
        _ => effective(&opts.resolution, &preset.resolution)
            .as_deref()
            .and_then(resolution_dimensions),
    };
    if let Some((width, height)) = dims {
        filters.push(format!("scale={width}:{height}"));
    }

    if let Some(fps) = opts.frame_rate.or(preset.frame_rate) {
        filters.push(format!("fps={fps}"));
    }
    if opts.deinterlace.unwrap_or(preset.deinterlace) {
        filters.push("yadif".to_string());
    }
    if let Some(denoise) = effective(&opts.denoise, &preset.denoise) {
        filters.push(denoise);
    }
    if let Some(extra) = &opts.video_filters {
        filters.push(extra.clone());
    }
    filters
}

/// Hardware-acceleration flags; these must precede `-i`.
fn hw_accel_args(selector: HardwareAcceleration, video_codec: Option<&str>) -> Vec<String> {
    let accel = match selector {
        HardwareAcceleration::None => None,
        HardwareAcceleration::Nvidia => Some("cuda"),
        HardwareAcceleration::Intel => Some("qsv"),
        HardwareAcceleration::Vaapi => Some("vaapi"),
        HardwareAcceleration::Amd => Some("auto"),
        HardwareAcceleration::Auto => {
            let codec = video_codec.unwrap_or_default();
            if codec.contains("nvenc") {
                Some("cuda")
            } else if codec.contains("qsv") {
                Some("qsv")
            } else if codec.contains("vaapi") {
                Some("vaapi")
            } else if codec.contains("amf") {
                Some("auto")
            } else {
                None
            }
        }
    };
    accel
        .map(|name| vec!["-hwaccel".to_string(), name.to_string()])
        .unwrap_or_default()
}

/// The CRF-equivalent flag for a codec, and whether this builder emits one.
fn crf_flag(codec: &str) -> (&'static str, bool) {
    if codec.contains("nvenc") {
        ("-cq", true)
    } else if codec.contains("qsv") {
        ("-global_quality", true)
    } else if codec.contains("amf") || codec.contains("vaapi") {
        ("-qp", true)
    } else if GPU_FAMILIES.iter().any(|family| codec.contains(family)) {
        ("-crf", false)
    } else if codec == "gif" {
        ("-crf", false)
    } else {
        ("-crf", true)
    }
}

fn supports_preset_flag(codec: &str) -> bool {
    codec.contains("x264") || codec.contains("x265") || codec.contains("nvenc")
}

fn resolve_quality(preset: &Preset, opts: &ConversionOptions) -> (QualityMode, Option<String>) {
    if let Some(value) = &opts.video_quality {
        let mode = opts.quality_mode.unwrap_or(QualityMode::Crf);
        return (mode, Some(value.clone()));
    }
    if let Some(bitrate) = &preset.video_bitrate {
        return (QualityMode::Bitrate, Some(bitrate.clone()));
    }
    (QualityMode::Crf, preset.crf.map(|crf| crf.to_string()))
}

/// Named resolution table.
#[must_use]
pub fn resolution_dimensions(name: &str) -> Option<(u32, u32)> {
    match name.to_ascii_lowercase().as_str() {
        "8k" | "4320p" => Some((7680, 4320)),
        "4k" | "2160p" => Some((3840, 2160)),
        "1440p" | "2k" => Some((2560, 1440)),
        "1080p" => Some((1920, 1080)),
        "720p" => Some((1280, 720)),
        "480p" => Some((854, 480)),
        "360p" => Some((640, 360)),
        _ => None,
    }
}

fn effective(override_value: &Option<String>, preset_value: &Option<String>) -> Option<String> {
    match override_value {
        Some(value) if !value.trim().is_empty() => Some(value.clone()),
        _ => preset_value.clone(),
    }
}

fn format_seconds(value: f64) -> String {
    if (value.fract()).abs() < f64::EPSILON {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

fn null_sink() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::{get_by_name, get_default};
    use vconv_core::{Job, NewJob};

    fn job_with(overrides: ConversionOptions) -> Job {
        Job::new(NewJob {
            name: "clip".into(),
            input_path: "/data/uploads/clip.mov".into(),
            output_path: "/data/outputs/clip.mp4".into(),
            input_bytes: 1024,
            preset_name: "Fast 1080p30".into(),
            overrides,
        })
    }

    fn position(args: &[String], flag: &str) -> usize {
        args.iter().position(|a| a == flag).unwrap()
    }

    #[test]
    fn frame_is_y_progress_input_output() {
        let plan = build(get_default(), &job_with(ConversionOptions::default()));
        assert_eq!(&plan.args[..3], &["-y", "-progress", "pipe:2"]);
        assert_eq!(plan.args.last().unwrap(), "/data/outputs/clip.mp4");
        let i = position(&plan.args, "-i");
        assert_eq!(plan.args[i + 1], "/data/uploads/clip.mov");
    }

    #[test]
    fn hw_accel_flags_precede_input() {
        let plan = build(
            get_default(),
            &job_with(ConversionOptions {
                video_codec: Some("h264_nvenc".into()),
                ..ConversionOptions::default()
            }),
        );
        let hw = position(&plan.args, "-hwaccel");
        assert_eq!(plan.args[hw + 1], "cuda");
        assert!(hw < position(&plan.args, "-i"));
    }

    #[test]
    fn software_codec_gets_no_hw_flags_by_default() {
        let plan = build(get_default(), &job_with(ConversionOptions::default()));
        assert!(!plan.args.iter().any(|a| a == "-hwaccel"));
    }

    #[test]
    fn gpu_encoders_use_their_own_quality_flag() {
        let nvenc = build(
            get_default(),
            &job_with(ConversionOptions {
                video_codec: Some("hevc_nvenc".into()),
                video_quality: Some("28".into()),
                ..ConversionOptions::default()
            }),
        );
        assert!(nvenc.args.iter().any(|a| a == "-cq"));
        assert!(!nvenc.args.iter().any(|a| a == "-crf"));

        let qsv = build(
            get_default(),
            &job_with(ConversionOptions {
                video_codec: Some("h264_qsv".into()),
                video_quality: Some("28".into()),
                ..ConversionOptions::default()
            }),
        );
        assert!(qsv.args.iter().any(|a| a == "-global_quality"));
    }

    #[test]
    fn filters_are_coalesced_into_one_vf() {
        let plan = build(
            get_default(),
            &job_with(ConversionOptions {
                deinterlace: Some(true),
                denoise: Some("hqdn3d=4:3:6:4".into()),
                video_filters: Some("eq=brightness=0.05".into()),
                ..ConversionOptions::default()
            }),
        );
        let vf_count = plan.args.iter().filter(|a| *a == "-vf").count();
        assert_eq!(vf_count, 1);
        let vf = &plan.args[position(&plan.args, "-vf") + 1];
        assert!(vf.contains("scale=1920:1080"));
        assert!(vf.contains("fps=30"));
        assert!(vf.contains("yadif"));
        assert!(vf.contains("hqdn3d=4:3:6:4"));
        assert!(vf.contains("eq=brightness=0.05"));
    }

    #[test]
    fn faststart_only_for_mp4_and_mov() {
        let mp4 = build(get_default(), &job_with(ConversionOptions::default()));
        assert!(mp4.args.iter().any(|a| a == "+faststart"));

        let mkv = build(
            get_default(),
            &job_with(ConversionOptions {
                output_format: Some("mkv".into()),
                ..ConversionOptions::default()
            }),
        );
        assert!(!mkv.args.iter().any(|a| a == "+faststart"));

        let disabled = build(
            get_default(),
            &job_with(ConversionOptions {
                fast_start: Some(false),
                ..ConversionOptions::default()
            }),
        );
        assert!(!disabled.args.iter().any(|a| a == "+faststart"));
    }

    #[test]
    fn audio_containers_suppress_video() {
        let plan = build(
            get_by_name("Audio Only MP3").unwrap(),
            &job_with(ConversionOptions::default()),
        );
        assert!(plan.args.iter().any(|a| a == "-vn"));
        assert!(!plan.args.iter().any(|a| a == "-c:v"));
        assert!(!plan.args.iter().any(|a| a == "-vf"));
        assert!(plan.video_codec.is_none());
    }

    #[test]
    fn override_wins_over_preset() {
        let plan = build(
            get_default(),
            &job_with(ConversionOptions {
                video_codec: Some("libx265".into()),
                resolution: Some("720p".into()),
                ..ConversionOptions::default()
            }),
        );
        let cv = position(&plan.args, "-c:v");
        assert_eq!(plan.args[cv + 1], "libx265");
        let vf = &plan.args[position(&plan.args, "-vf") + 1];
        assert!(vf.contains("scale=1280:720"));
    }

    #[test]
    fn empty_override_falls_back_to_preset() {
        let plan = build(
            get_default(),
            &job_with(ConversionOptions {
                video_codec: Some("  ".into()),
                ..ConversionOptions::default()
            }),
        );
        let cv = position(&plan.args, "-c:v");
        assert_eq!(plan.args[cv + 1], "libx264");
    }

    #[test]
    fn bitrate_two_pass_produces_both_passes() {
        let plan = build(
            get_default(),
            &job_with(ConversionOptions {
                quality_mode: Some(QualityMode::Bitrate),
                video_quality: Some("4000k".into()),
                two_pass: Some(true),
                ..ConversionOptions::default()
            }),
        );
        let first = plan.first_pass.unwrap();
        assert!(first.windows(2).any(|w| w[0] == "-pass" && w[1] == "1"));
        assert!(first.iter().any(|a| a == "null"));
        assert!(plan.args.windows(2).any(|w| w[0] == "-pass" && w[1] == "2"));
        assert!(plan.args.iter().any(|a| a == "-b:v"));
    }

    #[test]
    fn crf_two_pass_is_ignored() {
        let plan = build(
            get_default(),
            &job_with(ConversionOptions {
                two_pass: Some(true),
                ..ConversionOptions::default()
            }),
        );
        assert!(plan.first_pass.is_none());
        assert!(!plan.args.iter().any(|a| a == "-pass"));
    }

    #[test]
    fn custom_params_are_appended_before_output() {
        let plan = build(
            get_default(),
            &job_with(ConversionOptions {
                custom_params: Some("-metadata title=Demo".into()),
                ..ConversionOptions::default()
            }),
        );
        let meta = position(&plan.args, "-metadata");
        assert_eq!(plan.args[meta + 1], "title=Demo");
        assert!(meta < plan.args.len() - 1);
    }

    #[test]
    fn trim_arguments_follow_input() {
        let plan = build(
            get_default(),
            &job_with(ConversionOptions {
                start_time: Some("00:00:05".into()),
                end_time: Some("00:00:15".into()),
                duration_limit: Some(8.0),
                ..ConversionOptions::default()
            }),
        );
        let i = position(&plan.args, "-i");
        let ss = position(&plan.args, "-ss");
        assert!(ss > i);
        assert_eq!(plan.args[ss + 1], "00:00:05");
        assert_eq!(plan.args[position(&plan.args, "-to") + 1], "00:00:15");
        assert_eq!(plan.args[position(&plan.args, "-t") + 1], "8");
    }

    #[test]
    fn gif_output_is_silent_and_unprofiled() {
        let plan = build(
            get_by_name("GIF Preview").unwrap(),
            &job_with(ConversionOptions::default()),
        );
        assert!(plan.args.iter().any(|a| a == "-an"));
        assert!(!plan.args.iter().any(|a| a == "-pix_fmt"));
        assert!(!plan.args.iter().any(|a| a == "-crf"));
    }
}
