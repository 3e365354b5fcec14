//! Core domain types: jobs, conversion options, download records, space
//! accounting, and batches.

mod batch;
mod download;
mod job;
mod options;
mod space;

pub use batch::{Batch, BatchStatus};
pub use download::DownloadRecord;
pub use job::{Job, JobStatus, NewJob, ProgressPatch};
pub use options::{ConversionOptions, HardwareAcceleration, QualityMode};
pub use space::{GIB, QuotaConfigError, SpaceCheck, SpaceQuota, SpaceUsage, UsageBucket};
