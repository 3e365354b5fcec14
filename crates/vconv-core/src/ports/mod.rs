//! Port definitions: the async traits the adapter crates implement.
//!
//! Services depend on these traits (as `Arc<dyn …>`), never on concrete
//! repositories, so storage can be swapped for in-memory fakes in tests.

mod download_store;
mod space_store;
mod task_store;

pub use download_store::DownloadStore;
pub use space_store::{BatchStore, SpaceStore};
pub use task_store::TaskStore;

/// Error surfaced by every store port.
///
/// The store either applies an operation fully or reports one of these; a
/// caller never observes a partially applied update. Call sites that can
/// retry do so once before propagating.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// The underlying store refused or failed the operation.
    #[error("storage error: {0}")]
    Storage(String),

    /// The addressed row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A terminal-state verification failed even after a retry.
    #[error("state verification failed for job {job_id}: expected {expected}, found {found}")]
    VerificationFailed {
        job_id: String,
        expected: String,
        found: String,
    },
}

impl StorageError {
    /// Build a generic storage error from any displayable cause.
    pub fn storage(cause: impl std::fmt::Display) -> Self {
        Self::Storage(cause.to_string())
    }
}
