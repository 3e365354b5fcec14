//! `SQLite` repository implementations of the core store ports.

mod row_mappers;
mod sqlite_download_repository;
mod sqlite_space_repository;
mod sqlite_task_repository;

pub use sqlite_download_repository::SqliteDownloadRepository;
pub use sqlite_space_repository::{SqliteBatchRepository, SqliteSpaceRepository};
pub use sqlite_task_repository::SqliteTaskRepository;
