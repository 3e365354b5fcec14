//! The FFmpeg runner: turn a claimed job into an encoder invocation, stream
//! its progress, and write exactly one terminal status.
//!
//! # Design Principles
//!
//! - The runner owns the process table and the cancel-token registry; no
//!   other module touches them directly.
//! - Nothing escapes [`Runner::run`]: every exit path (success, failure,
//!   cancellation, stall, spawn error) ends in a terminal store write and
//!   the matching events.
//! - The worker-pool slot is held for the whole encode and released on drop,
//!   so no exit path can leak capacity.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use vconv_core::{
    BatchStore, Job, JobStatus, Notification, NotificationBus, ProgressPatch, TaskStore,
    UsageBucket,
};
use vconv_space::{SpaceEstimator, UsageTracker};

use crate::args::{self, EncodePlan};
use crate::config::EngineConfig;
use crate::presets;
use crate::probe;
use crate::process_table::{ProcessSnapshot, ProcessTable, kill_process_tree};
use crate::progress::{ProgressGate, StderrTail, parse_progress_line, percent_of};

/// Trailing stderr kept for failure messages.
const STDERR_TAIL_BYTES: usize = 4096;

/// Cancel reason recorded for user-initiated cancellation.
const CANCEL_REASON_USER: &str = "user cancelled";

/// Cancel reason recorded when the encoder goes silent.
const CANCEL_REASON_STALL: &str = "encoder stalled";

/// Dependencies of the runner, cloned `Arc`s to explicit collaborators.
pub struct RunnerDeps {
    /// Job persistence.
    pub store: Arc<dyn TaskStore>,
    /// Event fan-out.
    pub bus: Arc<NotificationBus>,
    /// Batch membership bookkeeping.
    pub batches: Arc<dyn BatchStore>,
    /// Estimator calibrated with observed output sizes.
    pub estimator: Arc<SpaceEstimator>,
    /// Usage buckets adjusted as outputs appear.
    pub usage: Arc<UsageTracker>,
}

/// How one encode ended.
enum RunOutcome {
    Completed { output_bytes: u64 },
    Cancelled { reason: &'static str },
    Failed { message: String },
}

/// Why the stderr loop stopped.
enum EndReason {
    Eof,
    Cancelled,
    Stalled,
}

/// The FFmpeg runner.
pub struct Runner {
    deps: RunnerDeps,
    config: EngineConfig,
    table: ProcessTable,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
    pending_cancel: Mutex<HashSet<String>>,
    slots: Arc<Semaphore>,
}

impl Runner {
    /// Create a runner with a worker pool of `config.max_concurrent` slots.
    #[must_use]
    pub fn new(deps: RunnerDeps, config: EngineConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            deps,
            config,
            table: ProcessTable::new(),
            cancel_tokens: Mutex::new(HashMap::new()),
            pending_cancel: Mutex::new(HashSet::new()),
            slots,
        }
    }

    /// Request cancellation of a job.
    ///
    /// A claimed job's token fires immediately; a job the runner has not
    /// seen yet is flagged so the flag is observed at start and the run
    /// aborts cleanly before spawning. Returns true when a live token was
    /// fired.
    pub fn request_cancel(&self, job_id: &str) -> bool {
        let tokens = self.cancel_tokens.lock().expect("cancel registry poisoned");
        if let Some(token) = tokens.get(job_id) {
            token.cancel();
            return true;
        }
        drop(tokens);
        self.pending_cancel
            .lock()
            .expect("cancel registry poisoned")
            .insert(job_id.to_string());
        false
    }

    /// Fire every registered cancel token (shutdown path).
    pub fn cancel_all(&self) {
        let tokens = self.cancel_tokens.lock().expect("cancel registry poisoned");
        for token in tokens.values() {
            token.cancel();
        }
    }

    /// Job ids with a live encoder process.
    #[must_use]
    pub fn running_jobs(&self) -> Vec<String> {
        self.table.list()
    }

    /// Snapshot of live encoder processes.
    #[must_use]
    pub fn process_snapshot(&self) -> Vec<ProcessSnapshot> {
        self.table.snapshot()
    }

    /// Number of live encoder processes.
    #[must_use]
    pub fn live_process_count(&self) -> usize {
        self.table.len()
    }

    /// Run one claimed job to its terminal status.
    ///
    /// The job must already be `Converting` (claimed through the store's
    /// `try_start`). This method never panics the caller's loop and never
    /// returns an error; failures become the job's terminal state.
    pub async fn run(&self, job: Job) {
        let job_id = job.id.clone();
        let token = CancellationToken::new();
        {
            let was_pending = self
                .pending_cancel
                .lock()
                .expect("cancel registry poisoned")
                .remove(&job_id);
            if was_pending {
                token.cancel();
            }
            self.cancel_tokens
                .lock()
                .expect("cancel registry poisoned")
                .insert(job_id.clone(), token.clone());
        }

        // One slot per live encoder; held until this scope ends.
        let permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::error!(job_id = %job_id, "worker pool closed, aborting run");
                self.forget(&job_id);
                return;
            }
        };

        let outcome = self.execute(&job, &token).await;
        self.finalize(&job, outcome).await;

        // Table entries go before the slot frees up, so a successor's
        // registration can never overlap ours.
        self.forget(&job_id);
        drop(permit);
    }

    fn forget(&self, job_id: &str) {
        self.table.remove(job_id);
        self.cancel_tokens
            .lock()
            .expect("cancel registry poisoned")
            .remove(job_id);
    }

    async fn execute(&self, job: &Job, token: &CancellationToken) -> RunOutcome {
        if token.is_cancelled() {
            return RunOutcome::Cancelled {
                reason: CANCEL_REASON_USER,
            };
        }

        self.publish_status(job, JobStatus::Converting, None);

        let duration = probe::probe_duration(&self.config.ffprobe_path, &job.input_path).await;
        if let Some(duration_sec) = duration {
            let patch = ProgressPatch {
                progress: 0,
                duration_sec: Some(duration_sec),
                ..ProgressPatch::default()
            };
            if let Err(e) = self.update_progress_retrying(&job.id, &patch).await {
                tracing::warn!(job_id = %job.id, error = %e, "cannot persist probed duration");
            }
        } else {
            tracing::info!(job_id = %job.id, "duration unknown, progress degrades to time-only");
        }

        let preset = presets::get_by_name(&job.preset_name).unwrap_or_else(presets::get_default);
        let plan = args::build(preset, job);
        tracing::debug!(
            job_id = %job.id,
            command = %format!("{} {}", self.config.ffmpeg_path.display(), plan.args.join(" ")),
            "resolved encoder invocation"
        );

        if let Some(first_pass) = plan.first_pass.clone() {
            if let Err(outcome) = self.run_first_pass(job, &first_pass, token).await {
                return outcome;
            }
        }

        self.run_encode(job, &plan, duration, token).await
    }

    /// Analysis pass of a two-pass encode: no progress events, output
    /// discarded.
    async fn run_first_pass(
        &self,
        job: &Job,
        pass_args: &[String],
        token: &CancellationToken,
    ) -> Result<(), RunOutcome> {
        let mut child = match self.spawn(pass_args) {
            Ok(child) => child,
            Err(message) => return Err(RunOutcome::Failed { message }),
        };
        let mut lines = take_stderr_lines(&mut child);
        let mut tail = StderrTail::new(STDERR_TAIL_BYTES);

        let end = loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break EndReason::Cancelled,
                line = tokio::time::timeout(self.config.stall_timeout, lines.next_line()) => {
                    match line {
                        Err(_) => break EndReason::Stalled,
                        Ok(Ok(Some(line))) => {
                            if !line.trim().is_empty() {
                                tail.push_line(&line);
                            }
                        }
                        Ok(Ok(None)) | Ok(Err(_)) => break EndReason::Eof,
                    }
                }
            }
        };

        match end {
            EndReason::Cancelled => {
                self.kill(&job.id, &mut child).await;
                Err(RunOutcome::Cancelled {
                    reason: CANCEL_REASON_USER,
                })
            }
            EndReason::Stalled => {
                self.kill(&job.id, &mut child).await;
                Err(RunOutcome::Cancelled {
                    reason: CANCEL_REASON_STALL,
                })
            }
            EndReason::Eof => match child.wait().await {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(RunOutcome::Failed {
                    message: failure_message(status.code(), &tail),
                }),
                Err(e) => Err(RunOutcome::Failed {
                    message: format!("cannot reap first-pass encoder: {e}"),
                }),
            },
        }
    }

    /// The (final) encode pass with progress streaming.
    async fn run_encode(
        &self,
        job: &Job,
        plan: &EncodePlan,
        duration: Option<f64>,
        token: &CancellationToken,
    ) -> RunOutcome {
        let mut child = match self.spawn(&plan.args) {
            Ok(child) => child,
            Err(message) => return RunOutcome::Failed { message },
        };
        let pid = child.id().unwrap_or_default();

        // Registered before the first stderr line is processed; removal is
        // deferred to the exit handler.
        self.table.register(&job.id, pid, token.clone());

        let mut lines = take_stderr_lines(&mut child);
        let mut tail = StderrTail::new(STDERR_TAIL_BYTES);
        let mut state = ProgressState::new(
            duration,
            ProgressGate::new(
                self.config.progress_interval,
                self.config.progress_percent_step,
            ),
        );

        let end = loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break EndReason::Cancelled,
                line = tokio::time::timeout(self.config.stall_timeout, lines.next_line()) => {
                    match line {
                        Err(_) => break EndReason::Stalled,
                        Ok(Ok(Some(line))) => self.handle_line(job, &line, &mut state, &mut tail).await,
                        Ok(Ok(None)) => break EndReason::Eof,
                        Ok(Err(e)) => {
                            tracing::warn!(job_id = %job.id, error = %e, "stderr read failed");
                            break EndReason::Eof;
                        }
                    }
                }
            }
        };

        match end {
            EndReason::Cancelled => {
                self.kill(&job.id, &mut child).await;
                RunOutcome::Cancelled {
                    reason: CANCEL_REASON_USER,
                }
            }
            EndReason::Stalled => {
                tracing::warn!(
                    job_id = %job.id,
                    timeout_secs = self.config.stall_timeout.as_secs(),
                    "no encoder output within the stall window"
                );
                self.kill(&job.id, &mut child).await;
                RunOutcome::Cancelled {
                    reason: CANCEL_REASON_STALL,
                }
            }
            EndReason::Eof => {
                let status = match child.wait().await {
                    Ok(status) => status,
                    Err(e) => {
                        return RunOutcome::Failed {
                            message: format!("cannot reap encoder: {e}"),
                        };
                    }
                };
                if token.is_cancelled() {
                    return RunOutcome::Cancelled {
                        reason: CANCEL_REASON_USER,
                    };
                }
                if !status.success() {
                    return RunOutcome::Failed {
                        message: failure_message(status.code(), &tail),
                    };
                }
                match tokio::fs::metadata(&job.output_path).await {
                    Ok(meta) if meta.len() > 0 => RunOutcome::Completed {
                        output_bytes: meta.len(),
                    },
                    _ => RunOutcome::Failed {
                        message: "encoder reported success but produced no output".to_string(),
                    },
                }
            }
        }
    }

    async fn handle_line(
        &self,
        job: &Job,
        line: &str,
        state: &mut ProgressState,
        tail: &mut StderrTail,
    ) {
        if !line.trim().is_empty() {
            tail.push_line(line);
        }
        let Some(parsed) = parse_progress_line(line) else {
            return;
        };

        let update = state.observe(parsed.seconds);
        if !state.gate.admit(update.percent) {
            return;
        }

        let patch = ProgressPatch {
            progress: update.percent,
            current_sec: Some(parsed.seconds),
            speed: update.speed,
            eta_sec: update.eta,
            duration_sec: None,
        };
        if let Err(e) = self.update_progress_retrying(&job.id, &patch).await {
            tracing::warn!(job_id = %job.id, error = %e, "progress update failed");
        }
        self.deps.bus.publish_job(
            &job.id,
            Notification::ProgressUpdate {
                task_id: job.id.clone(),
                progress: update.percent,
                message: format!("converting {}", job.name),
                speed: update.speed,
                remaining_seconds: update.eta,
            },
        );
    }

    async fn finalize(&self, job: &Job, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Completed { output_bytes } => {
                self.write_terminal(&job.id, JobStatus::Completed, None, Some(output_bytes))
                    .await;
                self.deps.usage.add(UsageBucket::Outputs, output_bytes);
                let preset =
                    presets::get_by_name(&job.preset_name).unwrap_or_else(presets::get_default);
                if let Some(codec) = job
                    .overrides
                    .video_codec
                    .clone()
                    .or_else(|| preset.video_codec.clone())
                {
                    self.deps
                        .estimator
                        .record_actual(&codec, job.input_bytes, output_bytes);
                }

                self.publish_status(job, JobStatus::Completed, None);
                self.deps.bus.publish_job(
                    &job.id,
                    Notification::ProgressUpdate {
                        task_id: job.id.clone(),
                        progress: 100,
                        message: format!("completed {}", job.name),
                        speed: None,
                        remaining_seconds: Some(0.0),
                    },
                );
                self.deps.bus.publish_job(
                    &job.id,
                    Notification::TaskCompleted {
                        task_id: job.id.clone(),
                        task_name: job.name.clone(),
                        status: JobStatus::Completed.wire_code(),
                        output_bytes,
                    },
                );
                tracing::info!(job_id = %job.id, output_bytes, "conversion completed");
            }
            RunOutcome::Cancelled { reason } => {
                self.write_terminal(&job.id, JobStatus::Cancelled, Some(reason), None)
                    .await;
                self.publish_status(job, JobStatus::Cancelled, Some(reason));
                tracing::info!(job_id = %job.id, reason, "conversion cancelled");
            }
            RunOutcome::Failed { message } => {
                self.write_terminal(&job.id, JobStatus::Failed, Some(&message), None)
                    .await;
                self.publish_status(job, JobStatus::Failed, Some(&message));
                tracing::warn!(job_id = %job.id, error = %message, "conversion failed");
            }
        }

        match self.deps.batches.record_member_terminal(&job.id).await {
            Ok(Some(batch)) if batch.all_members_terminal() => {
                tracing::info!(batch_id = %batch.id, "batch finished");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "batch bookkeeping failed");
            }
        }
    }

    fn spawn(&self, argv: &[String]) -> Result<Child, String> {
        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command.spawn().map_err(|e| {
            format!(
                "failed to start the encoder ({e}); ensure FFmpeg is installed and \
                 the configured path points at the binary"
            )
        })
    }

    async fn kill(&self, job_id: &str, child: &mut Child) {
        if let Err(e) = kill_process_tree(child, self.config.kill_grace).await {
            tracing::warn!(job_id = %job_id, error = %e, "subtree kill failed");
        }
    }

    /// Store writes are retried once before being surfaced, then logged.
    async fn write_terminal(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
        output_bytes: Option<u64>,
    ) {
        let mut attempt = 0u8;
        loop {
            match self
                .deps
                .store
                .set_terminal(job_id, status, error, output_bytes)
                .await
            {
                Ok(()) => return,
                Err(e) if attempt == 0 => {
                    tracing::warn!(job_id = %job_id, error = %e, "terminal write failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "terminal write failed twice");
                    return;
                }
            }
        }
    }

    async fn update_progress_retrying(
        &self,
        job_id: &str,
        patch: &ProgressPatch,
    ) -> Result<(), vconv_core::StorageError> {
        match self.deps.store.update_progress(job_id, patch).await {
            Ok(()) => Ok(()),
            Err(_) => self.deps.store.update_progress(job_id, patch).await,
        }
    }

    fn publish_status(&self, job: &Job, status: JobStatus, error: Option<&str>) {
        self.deps.bus.publish_job(
            &job.id,
            Notification::StatusUpdate {
                task_id: job.id.clone(),
                status: status.wire_code(),
                error_message: error.map(str::to_string),
            },
        );
    }
}

fn take_stderr_lines(child: &mut Child) -> Lines<BufReader<ChildStderr>> {
    let stderr = child
        .stderr
        .take()
        .expect("child spawned with piped stderr");
    BufReader::new(stderr).lines()
}

fn failure_message(code: Option<i32>, tail: &StderrTail) -> String {
    let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    if tail.is_empty() {
        format!("encoder exited with status {code}")
    } else {
        format!("encoder exited with status {code}: {}", tail.as_text())
    }
}

/// Derived progress values for one observation.
struct ProgressUpdateValues {
    percent: u8,
    speed: Option<f64>,
    eta: Option<f64>,
}

/// Monotonic progress derivation across one encode.
struct ProgressState {
    duration: Option<f64>,
    started: Instant,
    percent: u8,
    gate: ProgressGate,
}

impl ProgressState {
    fn new(duration: Option<f64>, gate: ProgressGate) -> Self {
        Self {
            duration,
            started: Instant::now(),
            percent: 0,
            gate,
        }
    }

    fn observe(&mut self, seconds: f64) -> ProgressUpdateValues {
        if let Some(duration) = self.duration {
            // Never regress, never reach 100 before exit.
            self.percent = self.percent.max(percent_of(duration, seconds));
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let speed = (elapsed > 0.0).then(|| seconds / elapsed);
        let eta = match (self.duration, speed) {
            (Some(duration), Some(speed)) if speed > 0.0 => {
                Some(((duration - seconds) / speed).max(0.0))
            }
            _ => None,
        };
        ProgressUpdateValues {
            percent: self.percent,
            speed,
            eta,
        }
    }
}
