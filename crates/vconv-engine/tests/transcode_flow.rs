//! End-to-end engine tests against a mock FFmpeg/FFprobe pair.
//!
//! The mock encoder emits real `-progress pipe:2`-style stderr lines,
//! writes an output file, and honors SIGTERM, so the dispatcher → runner
//! pipeline (claiming, progress fan-out, cancellation, stall detection,
//! slot bound) is exercised exactly as with the real binary.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use vconv_core::{
    ConversionOptions, Job, JobStatus, NewJob, Notification, NotificationBus, TaskStore,
};
use vconv_db::{
    SqliteBatchRepository, SqliteDownloadRepository, SqliteSpaceRepository, SqliteTaskRepository,
    setup_test_database,
};
use vconv_engine::{Dispatcher, EngineConfig, Runner, RunnerDeps};
use vconv_space::{
    RetentionTracker, SpaceConfig, SpaceEstimator, SpaceGovernor, UsageTracker,
};

const MOCK_FFMPEG: &str = r#"#!/bin/sh
# Stand-in encoder: last argument is the output path.
out=""
for arg in "$@"; do out="$arg"; done
case "$out" in
  *hang*)
    sleep 30
    exit 1
    ;;
  *broken*)
    echo "Unknown encoder 'h265'" >&2
    exit 1
    ;;
esac
for t in 2000000 5000000 8000000; do
  echo "out_time_ms=$t" >&2
  sleep 0.05
done
echo "progress=end" >&2
printf 'encoded-bytes' > "$out"
exit 0
"#;

const MOCK_FFPROBE: &str = "#!/bin/sh\necho 10.0\n";

struct Harness {
    store: Arc<SqliteTaskRepository>,
    bus: Arc<NotificationBus>,
    runner: Arc<Runner>,
    dispatcher: Arc<Dispatcher>,
    data_dir: tempfile::TempDir,
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

async fn harness(configure: impl FnOnce(&mut EngineConfig)) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let data_dir = tempfile::tempdir().unwrap();
    let pool = setup_test_database().await.unwrap();
    let store = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let downloads = Arc::new(SqliteDownloadRepository::new(pool.clone()));
    let batches = Arc::new(SqliteBatchRepository::new(pool.clone()));
    let space_store = Arc::new(SqliteSpaceRepository::new(pool));
    let bus = Arc::new(NotificationBus::default());
    let usage = Arc::new(UsageTracker::new());
    let estimator = Arc::new(SpaceEstimator::new());

    let space_config = SpaceConfig::for_data_dir(data_dir.path());
    std::fs::create_dir_all(&space_config.upload_dir).unwrap();
    std::fs::create_dir_all(&space_config.output_dir).unwrap();

    let retention = Arc::new(RetentionTracker::new(
        store.clone(),
        downloads,
        bus.clone(),
        usage.clone(),
        Duration::from_secs(24 * 3600),
        space_config.output_dir.clone(),
    ));
    // Constructed for parity with production wiring; monitor loops stay off
    // in tests.
    let _governor = SpaceGovernor::new(
        space_store,
        store.clone(),
        retention,
        bus.clone(),
        usage.clone(),
        space_config,
    );

    let mut config = EngineConfig {
        ffmpeg_path: write_script(data_dir.path(), "ffmpeg", MOCK_FFMPEG),
        ffprobe_path: write_script(data_dir.path(), "ffprobe", MOCK_FFPROBE),
        max_concurrent: 2,
        poll_interval: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    configure(&mut config);

    let runner = Arc::new(Runner::new(
        RunnerDeps {
            store: store.clone(),
            bus: bus.clone(),
            batches,
            estimator,
            usage,
        },
        config.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), runner.clone(), config));

    Harness {
        store,
        bus,
        runner,
        dispatcher,
        data_dir,
    }
}

impl Harness {
    async fn create_job(&self, name: &str) -> Job {
        let input_path = self.data_dir.path().join("uploads").join(format!("{name}.mov"));
        std::fs::write(&input_path, vec![0u8; 1024]).unwrap();
        let job = Job::new(NewJob {
            name: name.into(),
            input_path,
            output_path: self
                .data_dir
                .path()
                .join("outputs")
                .join(format!("{name}.mp4")),
            input_bytes: 1024,
            preset_name: "Fast 1080p30".into(),
            overrides: ConversionOptions::default(),
        });
        self.store.create(&job).await.unwrap();
        job
    }

    async fn wait_terminal(&self, job_id: &str, within: Duration) -> Job {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let job = self.store.get(job_id).await.unwrap().unwrap();
            if job.is_terminal() {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {job_id} did not reach a terminal state in {within:?} (status {:?})",
                job.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn wait_running(&self, within: Duration) {
        let deadline = tokio::time::Instant::now() + within;
        while self.runner.live_process_count() == 0 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "no encoder process appeared within {within:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_no_processes(&self, within: Duration) {
        let deadline = tokio::time::Instant::now() + within;
        while self.runner.live_process_count() > 0 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "encoder processes lingered past {within:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[tokio::test]
async fn happy_path_reaches_completed_with_monotonic_progress() {
    let harness = harness(|_| {}).await;
    let job = harness.create_job("clip").await;

    let mut sub = harness.bus.subscribe("client");
    harness
        .bus
        .join("client", vconv_core::Group::Job(job.id.clone()));

    harness.dispatcher.drain_once().await.unwrap();
    let finished = harness.wait_terminal(&job.id, Duration::from_secs(10)).await;

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.progress, 100);
    assert!(finished.output_bytes > 0);
    assert!(finished.output_path.exists());
    assert!(finished.started_at.is_some());
    assert!(finished.completed_at.is_some());
    assert_eq!(finished.duration_sec, Some(10.0));

    // Collect the job-group event stream.
    let mut progress_values = Vec::new();
    let mut completed_events = 0;
    let mut last_progress_before_completed = None;
    while let Some(envelope) = sub.try_recv() {
        match envelope.event {
            Notification::ProgressUpdate { progress, .. } => progress_values.push(progress),
            Notification::TaskCompleted { output_bytes, .. } => {
                completed_events += 1;
                last_progress_before_completed = progress_values.last().copied();
                assert!(output_bytes > 0);
            }
            _ => {}
        }
    }

    assert!(
        progress_values.len() >= 3,
        "expected at least three progress events, got {progress_values:?}"
    );
    assert!(progress_values.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress_values.windows(2).any(|w| w[0] < w[1]));
    assert_eq!(completed_events, 1);
    assert_eq!(last_progress_before_completed, Some(100));
}

#[tokio::test]
async fn cancellation_kills_the_encoder_and_skips_completion() {
    let harness = harness(|_| {}).await;
    let job = harness.create_job("hang").await;

    let mut sub = harness.bus.subscribe("client");
    harness
        .bus
        .join("client", vconv_core::Group::Job(job.id.clone()));

    harness.dispatcher.drain_once().await.unwrap();
    harness.wait_running(Duration::from_secs(5)).await;

    assert!(harness.dispatcher.cancel(&job.id));
    let finished = harness.wait_terminal(&job.id, Duration::from_secs(4)).await;

    assert_eq!(finished.status, JobStatus::Cancelled);
    assert_eq!(finished.error.as_deref(), Some("user cancelled"));
    harness.wait_no_processes(Duration::from_secs(2)).await;
    assert!(!finished.output_path.exists());

    while let Some(envelope) = sub.try_recv() {
        assert!(
            !matches!(envelope.event, Notification::TaskCompleted { .. }),
            "cancelled job must not complete"
        );
    }
}

#[tokio::test]
async fn cancel_before_start_aborts_without_spawning() {
    let harness = harness(|_| {}).await;
    let job = harness.create_job("early").await;

    // Flag arrives while the job is still pending.
    assert!(!harness.dispatcher.cancel(&job.id));
    harness.dispatcher.drain_once().await.unwrap();

    let finished = harness.wait_terminal(&job.id, Duration::from_secs(5)).await;
    assert_eq!(finished.status, JobStatus::Cancelled);
    assert_eq!(finished.error.as_deref(), Some("user cancelled"));
    assert!(!finished.output_path.exists());
}

#[tokio::test]
async fn silent_encoder_is_stalled_out() {
    let harness = harness(|config| {
        config.stall_timeout = Duration::from_millis(300);
    })
    .await;
    let job = harness.create_job("hang-silent").await;

    harness.dispatcher.drain_once().await.unwrap();
    let finished = harness.wait_terminal(&job.id, Duration::from_secs(6)).await;

    assert_eq!(finished.status, JobStatus::Cancelled);
    assert_eq!(finished.error.as_deref(), Some("encoder stalled"));
    harness.wait_no_processes(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn encoder_failure_captures_stderr_tail() {
    let harness = harness(|_| {}).await;
    let job = harness.create_job("broken").await;

    harness.dispatcher.drain_once().await.unwrap();
    let finished = harness.wait_terminal(&job.id, Duration::from_secs(5)).await;

    assert_eq!(finished.status, JobStatus::Failed);
    let error = finished.error.unwrap();
    assert!(error.contains("Unknown encoder"), "error was: {error}");
}

#[tokio::test]
async fn repeated_drains_start_each_job_exactly_once() {
    let harness = harness(|_| {}).await;
    let job = harness.create_job("once").await;

    for _ in 0..5 {
        harness.dispatcher.drain_once().await.unwrap();
    }

    let finished = harness.wait_terminal(&job.id, Duration::from_secs(10)).await;
    assert_eq!(finished.status, JobStatus::Completed);
    // A double launch would have produced a second claim; the store-level
    // conditional update makes that impossible once the first drain won.
    assert!(!harness.store.try_start(&job.id).await.unwrap());
}

#[tokio::test]
async fn worker_pool_bound_holds_under_load() {
    let harness = harness(|config| {
        config.max_concurrent = 1;
    })
    .await;
    let first = harness.create_job("load-a").await;
    let second = harness.create_job("load-b").await;

    harness.dispatcher.drain_once().await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut peak = 0usize;
    loop {
        peak = peak.max(harness.runner.live_process_count());
        assert!(
            harness.runner.live_process_count() <= 1,
            "worker-pool bound violated"
        );
        let a = harness.store.get(&first.id).await.unwrap().unwrap();
        let b = harness.store.get(&second.id).await.unwrap().unwrap();
        if a.is_terminal() && b.is_terminal() {
            assert_eq!(a.status, JobStatus::Completed);
            assert_eq!(b.status, JobStatus::Completed);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(peak >= 1);
}

#[tokio::test]
async fn shutdown_cancels_in_flight_jobs_within_the_grace_window() {
    let harness = harness(|_| {}).await;
    let job = harness.create_job("hang-shutdown").await;

    harness.dispatcher.drain_once().await.unwrap();
    harness.wait_running(Duration::from_secs(5)).await;

    let started = tokio::time::Instant::now();
    harness.dispatcher.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(8));

    let finished = harness.store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Cancelled);
    assert_eq!(harness.runner.live_process_count(), 0);
}
