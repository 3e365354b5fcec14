//! Usage accounting for the three managed directory trees.
//!
//! Buckets are plain atomics so the runner and cleanup can adjust them
//! incrementally from any task; a full measurement walks the directory trees
//! on the blocking pool and is serialized by a mutex so only one walk runs
//! at a time.

use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use vconv_core::{SpaceUsage, UsageBucket};

use crate::config::SpaceConfig;

/// Shared, incrementally adjustable usage counters.
pub struct UsageTracker {
    uploads: AtomicU64,
    outputs: AtomicU64,
    temp: AtomicU64,
    last_measured_at: StdMutex<DateTime<Utc>>,
    /// Serializes full measurements.
    measure_lock: Mutex<()>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self {
            uploads: AtomicU64::new(0),
            outputs: AtomicU64::new(0),
            temp: AtomicU64::new(0),
            last_measured_at: StdMutex::new(Utc::now()),
            measure_lock: Mutex::new(()),
        }
    }
}

impl UsageTracker {
    /// Create a tracker with all buckets at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, bucket: UsageBucket) -> &AtomicU64 {
        match bucket {
            UsageBucket::Uploads => &self.uploads,
            UsageBucket::Outputs => &self.outputs,
            UsageBucket::Temp => &self.temp,
        }
    }

    /// Add bytes to a bucket.
    pub fn add(&self, bucket: UsageBucket, bytes: u64) {
        self.bucket(bucket).fetch_add(bytes, Ordering::Relaxed);
    }

    /// Subtract bytes from a bucket, clamping at zero.
    pub fn sub(&self, bucket: UsageBucket, bytes: u64) {
        let cell = self.bucket(bucket);
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Current counters as a usage snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SpaceUsage {
        SpaceUsage {
            uploads_bytes: self.uploads.load(Ordering::Relaxed),
            outputs_bytes: self.outputs.load(Ordering::Relaxed),
            temp_bytes: self.temp.load(Ordering::Relaxed),
            last_measured_at: *self
                .last_measured_at
                .lock()
                .expect("usage timestamp poisoned"),
        }
    }

    /// Total bytes across all buckets.
    #[must_use]
    pub fn total_used(&self) -> u64 {
        self.snapshot().total_used()
    }

    /// Walk the managed trees and replace the counters with measured sizes.
    ///
    /// Chunk scratch under `uploads/chunks` counts toward the temp bucket,
    /// not uploads. Only one measurement runs at a time; concurrent callers
    /// wait and then re-measure.
    pub async fn measure(&self, config: &SpaceConfig) -> SpaceUsage {
        let _guard = self.measure_lock.lock().await;

        let upload_dir = config.upload_dir.clone();
        let output_dir = config.output_dir.clone();
        let temp_dir = config.temp_dir.clone();
        let chunks_dir = config.chunks_dir();

        let (uploads, outputs, temp) = tokio::task::spawn_blocking(move || {
            let chunks = dir_size(&chunks_dir);
            let uploads = dir_size(&upload_dir).saturating_sub(chunks);
            let outputs = dir_size(&output_dir);
            let temp = dir_size(&temp_dir) + chunks;
            (uploads, outputs, temp)
        })
        .await
        .unwrap_or((0, 0, 0));

        self.uploads.store(uploads, Ordering::Relaxed);
        self.outputs.store(outputs, Ordering::Relaxed);
        self.temp.store(temp, Ordering::Relaxed);
        *self
            .last_measured_at
            .lock()
            .expect("usage timestamp poisoned") = Utc::now();

        self.snapshot()
    }
}

/// Recursive size of a directory tree; unreadable entries are skipped.
pub(crate) fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    let mut total = 0u64;
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_dir() {
            total += dir_size(&entry.path());
        } else {
            total += metadata.len();
        }
    }
    total
}

/// List the files under a directory tree with their sizes and mtimes.
pub(crate) fn walk_files(path: &Path) -> Vec<FileEntry> {
    let mut out = Vec::new();
    collect_files(path, &mut out);
    out
}

pub(crate) struct FileEntry {
    pub path: PathBuf,
    pub bytes: u64,
    pub modified: std::time::SystemTime,
}

fn collect_files(path: &Path, out: &mut Vec<FileEntry>) {
    let Ok(entries) = std::fs::read_dir(path) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_dir() {
            collect_files(&entry.path(), out);
        } else {
            out.push(FileEntry {
                path: entry.path(),
                bytes: metadata.len(),
                modified: metadata.modified().unwrap_or(std::time::UNIX_EPOCH),
            });
        }
    }
}
