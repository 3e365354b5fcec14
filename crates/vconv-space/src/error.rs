//! Error types for space management.

use vconv_core::StorageError;

/// Error surfaced by the governor and retention tracker.
///
/// Cleanup itself never fails on a single file: per-file I/O errors are
/// logged and the pass continues with the next candidate. These errors cover
/// store access and configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum SpaceError {
    /// The backing store refused an operation.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The addressed job does not exist.
    #[error("unknown job '{0}'")]
    UnknownJob(String),

    /// A filesystem operation outside of per-file cleanup failed.
    #[error("io error on {path}: {message}")]
    Io { path: String, message: String },
}
