//! The queue dispatcher: a single long-lived task that promotes pending
//! jobs and hands them to the runner.
//!
//! # Concurrency Model
//!
//! - One poll loop; per-job work runs in spawned tasks.
//! - The store's `try_start` conditional update is the claim primitive; the
//!   local in-flight set only suppresses redundant attempts while a job's
//!   task is still alive.
//! - A runner panic never stops the loop; the in-flight entry is dropped by
//!   a guard and the next poll continues.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use vconv_core::{Job, JobStatus, TaskStore};

use crate::config::EngineConfig;
use crate::runner::Runner;

/// Removes a job id from the in-flight set even when the runner panics.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.job_id);
    }
}

/// The queue dispatcher.
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    runner: Arc<Runner>,
    config: EngineConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher over the given store and runner.
    #[must_use]
    pub fn new(store: Arc<dyn TaskStore>, runner: Arc<Runner>, config: EngineConfig) -> Self {
        Self {
            store,
            runner,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: tokio::sync::Mutex::new(JoinSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the poll loop.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher.run_loop().await;
        })
    }

    async fn run_loop(self: &Arc<Self>) {
        tracing::info!(
            poll_secs = self.config.poll_interval.as_secs(),
            max_concurrent = self.config.max_concurrent,
            "dispatcher started"
        );
        loop {
            let delay = match self.drain_once().await {
                Ok(()) => self.config.poll_interval,
                Err(e) => {
                    tracing::warn!(error = %e, "queue poll failed, backing off");
                    self.config.store_retry_backoff
                }
            };
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        tracing::info!("dispatcher stopped");
    }

    /// One poll iteration (public so tests can drive it without timers).
    pub async fn drain_once(self: &Arc<Self>) -> Result<(), vconv_core::StorageError> {
        self.reap_finished().await;

        let active = self.store.list_active().await?;
        for job in active {
            if job.status != JobStatus::Pending {
                continue;
            }
            if self
                .in_flight
                .lock()
                .expect("in-flight set poisoned")
                .contains(&job.id)
            {
                continue;
            }
            match self.store.try_start(&job.id).await {
                Ok(true) => self.launch(job).await,
                Ok(false) => {
                    tracing::debug!(job_id = %job.id, "claim lost, job no longer pending");
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "claim failed");
                }
            }
        }
        Ok(())
    }

    async fn launch(self: &Arc<Self>, job: Job) {
        let job_id = job.id.clone();
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .insert(job_id.clone());

        let guard = InFlightGuard {
            set: Arc::clone(&self.in_flight),
            job_id: job_id.clone(),
        };
        let runner = Arc::clone(&self.runner);
        let mut tasks = self.tasks.lock().await;
        tasks.spawn(async move {
            let _guard = guard;
            runner.run(job).await;
        });
        tracing::info!(job_id = %job_id, "job dispatched");
    }

    /// Reap finished job tasks, logging panics without stopping the loop.
    async fn reap_finished(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(error = %e, "runner task panicked");
                }
            }
        }
    }

    /// Request cancellation of a job (live or not yet started).
    ///
    /// Terminal writes stay with the runner; this only fires or flags the
    /// cancel.
    pub fn cancel(&self, job_id: &str) -> bool {
        self.runner.request_cancel(job_id)
    }

    /// Job ids currently tracked as in flight.
    #[must_use]
    pub fn in_flight(&self) -> Vec<String> {
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Stop the loop, cancel in-flight jobs, and wait out the grace window.
    ///
    /// Jobs that do not finish within the shutdown timeout are aborted; the
    /// runner's kill-on-drop children die with them.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.runner.cancel_all();

        let mut tasks = self.tasks.lock().await;
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, tasks.join_next()).await {
                Ok(Some(result)) => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            tracing::error!(error = %e, "runner task panicked during shutdown");
                        }
                    }
                }
                Ok(None) => return,
                Err(_) => break,
            }
        }

        let survivors = tasks.len();
        if survivors > 0 {
            tracing::warn!(survivors, "forcing abort of in-flight jobs at shutdown");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}
