//! Tracking of live encoder processes and forced subtree termination.
//!
//! The runner is the single owner of this table; no other module touches it
//! directly. The narrow API is registration keyed by job id, cancellation
//! through the stored token, and read-only snapshots.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::process::Child;
use tokio_util::sync::CancellationToken;

/// A read-only view of one tracked encoder process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    /// Job the process encodes for.
    pub job_id: String,
    /// OS process id.
    pub pid: u32,
}

struct TrackedProcess {
    pid: u32,
    cancel: CancellationToken,
}

/// Live encoder processes keyed by job id.
#[derive(Default)]
pub struct ProcessTable {
    inner: Mutex<HashMap<String, TrackedProcess>>,
}

impl ProcessTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spawned child before its first stderr line is processed.
    pub fn register(&self, job_id: &str, pid: u32, cancel: CancellationToken) {
        let previous = self
            .inner
            .lock()
            .expect("process table poisoned")
            .insert(job_id.to_string(), TrackedProcess { pid, cancel });
        if previous.is_some() {
            tracing::warn!(job_id = %job_id, "process table already held an entry for this job");
        }
    }

    /// Remove a job's entry (deferred to the exit handler).
    pub fn remove(&self, job_id: &str) {
        self.inner
            .lock()
            .expect("process table poisoned")
            .remove(job_id);
    }

    /// Fire the cancel token of a live process. Returns false when the job
    /// has no registered process.
    pub fn cancel(&self, job_id: &str) -> bool {
        let table = self.inner.lock().expect("process table poisoned");
        match table.get(job_id) {
            Some(process) => {
                process.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Fire every tracked cancel token.
    pub fn cancel_all(&self) {
        let table = self.inner.lock().expect("process table poisoned");
        for process in table.values() {
            process.cancel.cancel();
        }
    }

    /// Job ids with a live process.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("process table poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of all tracked processes.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProcessSnapshot> {
        self.inner
            .lock()
            .expect("process table poisoned")
            .iter()
            .map(|(job_id, process)| ProcessSnapshot {
                job_id: job_id.clone(),
                pid: process.pid,
            })
            .collect()
    }

    /// Number of live processes (worker-slot accounting checks).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("process table poisoned").len()
    }

    /// Whether no process is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Terminate an encoder and all of its descendants.
///
/// FFmpeg can spawn helper processes, so the whole process group is
/// signalled, not only the root: graceful termination first, then an
/// unconditional kill after `grace`. The child must have been spawned as its
/// own process-group leader.
pub async fn kill_process_tree(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            // Already reaped.
            return Ok(());
        };
        let pgid = Pid::from_raw(pid as i32);

        match killpg(pgid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(std::io::Error::other(e)),
        }

        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return Ok(());
        }

        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(std::io::Error::other(e)),
        }
        child.wait().await.map(|_| ())
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        child.kill().await?;
        child.wait().await.map(|_| ())
    }
}
