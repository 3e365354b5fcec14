//! `SQLite` persistence for the vconv transcoding service.
//!
//! This crate implements the store ports defined in `vconv-core` on top of
//! `sqlx` with an embedded `SQLite` database: job rows with their atomic
//! state transitions, download retention records, the space accounting
//! singletons, and batch grouping. The schema is created in code on startup
//! (`setup_database`), so a fresh deployment needs no migration tooling.

mod repositories;
mod setup;

pub use repositories::{
    SqliteBatchRepository, SqliteDownloadRepository, SqliteSpaceRepository, SqliteTaskRepository,
};
pub use setup::setup_database;

#[cfg(any(test, feature = "test-utils"))]
pub use setup::setup_test_database;
