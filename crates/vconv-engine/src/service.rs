//! The conversion service: the explicit facade adapters talk to.
//!
//! Construction wires every collaborator explicitly (store, bus, governor,
//! estimator, retention tracker, dispatcher); there are no globals. The
//! HTTP surface calls into this facade and is the only layer translating
//! [`EngineError`] into user-visible responses.

use std::path::PathBuf;
use std::sync::Arc;

use vconv_core::{
    Batch, BatchStore, ConversionOptions, Job, JobStatus, NewJob, Notification, NotificationBus,
    QualityMode, StartConversionRequest, TaskStore,
};
use vconv_space::{
    EstimateInput, QualityTier, RetentionTracker, SpaceEstimator, SpaceGovernor,
};

use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::presets::{self, Preset};

/// One member of a batch admission request.
pub struct BatchItem {
    /// The client request for this member.
    pub request: StartConversionRequest,
    /// Uploaded input file (complete on disk).
    pub input_path: PathBuf,
    /// Input size in bytes.
    pub input_bytes: u64,
}

/// Dependencies of the conversion service.
pub struct ServiceDeps {
    pub store: Arc<dyn TaskStore>,
    pub batches: Arc<dyn BatchStore>,
    pub bus: Arc<NotificationBus>,
    pub governor: Arc<SpaceGovernor>,
    pub estimator: Arc<SpaceEstimator>,
    pub retention: Arc<RetentionTracker>,
    pub dispatcher: Arc<Dispatcher>,
}

/// The conversion service facade.
pub struct ConversionService {
    deps: ServiceDeps,
    output_dir: PathBuf,
}

impl ConversionService {
    /// Create the facade; `output_dir` is where converted files land.
    #[must_use]
    pub fn new(deps: ServiceDeps, output_dir: PathBuf) -> Self {
        Self { deps, output_dir }
    }

    /// Admit and create one job.
    ///
    /// Admission runs before anything is written: when the governor refuses,
    /// no job row exists and the quota error carries the shortfall.
    pub async fn create_job(
        &self,
        request: StartConversionRequest,
        input_path: PathBuf,
        input_bytes: u64,
    ) -> Result<Job, EngineError> {
        let preset = resolve_preset(request.preset.as_deref())?;
        let estimate = self
            .deps
            .estimator
            .estimate(input_bytes, &estimate_input(preset, &request.options));
        let check = self
            .deps
            .governor
            .check_space(estimate.total_required_bytes)
            .await?;
        if !check.sufficient {
            return Err(EngineError::Quota { check });
        }

        let job = self
            .insert_job(request, input_path, input_bytes, preset)
            .await?;
        Ok(job)
    }

    /// Admit and create a batch of jobs under one group.
    ///
    /// The aggregate estimate is admitted up front; when it does not fit, no
    /// rows are created. Registration always evaluates the batch against the
    /// governor so near-capacity batches warn their group.
    pub async fn create_batch(&self, items: Vec<BatchItem>) -> Result<Batch, EngineError> {
        let mut total_required = 0u64;
        let mut prepared = Vec::with_capacity(items.len());
        for item in items {
            let preset = resolve_preset(item.request.preset.as_deref())?;
            let estimate = self
                .deps
                .estimator
                .estimate(item.input_bytes, &estimate_input(preset, &item.request.options));
            total_required += estimate.total_required_bytes;
            prepared.push((item, preset));
        }

        let check = self.deps.governor.check_space(total_required).await?;
        if !check.sufficient {
            return Err(EngineError::Quota { check });
        }

        let mut job_ids = Vec::with_capacity(prepared.len());
        for (item, preset) in prepared {
            let job = self
                .insert_job(item.request, item.input_path, item.input_bytes, preset)
                .await?;
            job_ids.push(job.id);
        }

        let batch = Batch::new(job_ids, total_required);
        self.deps.batches.create(&batch).await?;
        self.deps
            .governor
            .evaluate_batch(&batch.id, total_required)
            .await?;
        tracing::info!(batch_id = %batch.id, jobs = batch.total_jobs, "batch registered");
        Ok(batch)
    }

    async fn insert_job(
        &self,
        request: StartConversionRequest,
        input_path: PathBuf,
        input_bytes: u64,
        preset: &Preset,
    ) -> Result<Job, EngineError> {
        let stem = input_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let name = request.task_name.clone().unwrap_or_else(|| stem.clone());
        let container = request
            .options
            .output_format
            .clone()
            .unwrap_or_else(|| preset.container.clone());

        let mut job = Job::new(NewJob {
            name,
            input_path,
            output_path: PathBuf::new(),
            input_bytes,
            preset_name: preset.name.clone(),
            overrides: request.options,
        });
        let short_id = &job.id[..job.id.len().min(8)];
        job.output_path = self.output_dir.join(format!("{stem}-{short_id}.{container}"));

        self.deps.store.create(&job).await?;
        tracing::info!(job_id = %job.id, preset = %job.preset_name, "job created");
        self.deps.bus.broadcast(Notification::TaskCreated {
            task_id: job.id.clone(),
            task_name: job.name.clone(),
        });
        Ok(job)
    }

    /// Fetch one job.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, EngineError> {
        Ok(self.deps.store.get(job_id).await?)
    }

    /// Jobs still pending or converting, oldest first.
    pub async fn list_active(&self) -> Result<Vec<Job>, EngineError> {
        Ok(self.deps.store.list_active().await?)
    }

    /// Request cancellation; idempotent.
    ///
    /// Returns the status observed at request time. Terminal writes remain
    /// with the runner.
    pub async fn cancel(&self, job_id: &str) -> Result<JobStatus, EngineError> {
        let job = self
            .deps
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| EngineError::UnknownJob(job_id.to_string()))?;
        if job.is_terminal() {
            return Ok(job.status);
        }
        self.deps.dispatcher.cancel(job_id);
        Ok(job.status)
    }

    /// Record a completed output download (fires retention scheduling).
    pub async fn track_download(
        &self,
        job_id: &str,
        client_addr: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(), EngineError> {
        self.deps
            .retention
            .track(job_id, client_addr, user_agent)
            .await?;
        Ok(())
    }

    /// The preset library, for the surface's listing endpoint.
    #[must_use]
    pub fn presets(&self) -> &'static [Preset] {
        presets::all_presets()
    }
}

fn resolve_preset(name: Option<&str>) -> Result<&'static Preset, EngineError> {
    match name {
        None => Ok(presets::get_default()),
        Some(name) => {
            presets::get_by_name(name).ok_or_else(|| EngineError::UnknownPreset(name.to_string()))
        }
    }
}

/// Map preset + overrides onto what the estimator cares about.
fn estimate_input(preset: &Preset, opts: &ConversionOptions) -> EstimateInput {
    let video_codec = opts
        .video_codec
        .clone()
        .or_else(|| preset.video_codec.clone());
    let container = opts
        .output_format
        .clone()
        .or_else(|| Some(preset.container.clone()));
    let resolution = opts.resolution.clone().or_else(|| preset.resolution.clone());

    let video_bitrate_kbps = match opts.quality_mode {
        Some(QualityMode::Bitrate) => opts.video_quality.as_deref().and_then(parse_bitrate_kbps),
        _ => preset.video_bitrate.as_deref().and_then(parse_bitrate_kbps),
    };

    let quality = video_bitrate_kbps.is_none().then(|| {
        let crf = opts
            .video_quality
            .as_deref()
            .and_then(|v| v.parse::<u32>().ok())
            .or(preset.crf);
        match crf {
            Some(crf) if crf <= 18 => QualityTier::High,
            Some(crf) if crf <= 23 => QualityTier::Medium,
            Some(_) => QualityTier::Low,
            None => QualityTier::Medium,
        }
    });

    EstimateInput {
        video_codec,
        container,
        resolution,
        video_bitrate_kbps,
        quality,
    }
}

/// Parse `4000k` / `4M` / plain bits-per-second into kbps.
fn parse_bitrate_kbps(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Some(number) = value.strip_suffix(['k', 'K']) {
        return number.parse().ok();
    }
    if let Some(number) = value.strip_suffix(['m', 'M']) {
        return number.parse::<u64>().ok().map(|m| m * 1000);
    }
    value.parse::<u64>().ok().map(|bps| bps / 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_suffixes_parse_to_kbps() {
        assert_eq!(parse_bitrate_kbps("4000k"), Some(4000));
        assert_eq!(parse_bitrate_kbps("4M"), Some(4000));
        assert_eq!(parse_bitrate_kbps("2500000"), Some(2500));
        assert_eq!(parse_bitrate_kbps("fast"), None);
    }

    #[test]
    fn estimate_input_prefers_overrides() {
        let preset = presets::get_default();
        let opts = ConversionOptions {
            video_codec: Some("libx265".into()),
            resolution: Some("720p".into()),
            quality_mode: Some(QualityMode::Bitrate),
            video_quality: Some("2000k".into()),
            ..ConversionOptions::default()
        };
        let input = estimate_input(preset, &opts);
        assert_eq!(input.video_codec.as_deref(), Some("libx265"));
        assert_eq!(input.resolution.as_deref(), Some("720p"));
        assert_eq!(input.video_bitrate_kbps, Some(2000));
        assert!(input.quality.is_none());
    }

    #[test]
    fn crf_maps_onto_quality_tiers() {
        let preset = presets::get_by_name("High Quality 1080p").unwrap();
        let input = estimate_input(preset, &ConversionOptions::default());
        assert_eq!(input.quality, Some(QualityTier::High));
        assert!(input.video_bitrate_kbps.is_none());
    }

    #[test]
    fn unknown_preset_is_an_error() {
        assert!(matches!(
            resolve_preset(Some("nope")),
            Err(EngineError::UnknownPreset(_))
        ));
        assert_eq!(resolve_preset(None).unwrap().name, "Fast 1080p30");
    }
}
