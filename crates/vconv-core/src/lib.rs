//! Core domain types, events, and port definitions for the vconv
//! transcoding service.
//!
//! This crate holds everything the subsystem crates share: the job state
//! machine and its invariants, the typed notification union and bus, the
//! store ports, the wire contracts of the external HTTP surface, and the
//! service settings. It deliberately carries no storage or process
//! dependencies; those live in the adapter crates.

pub mod bus;
pub mod contracts;
pub mod domain;
pub mod events;
pub mod ports;
pub mod settings;

// Re-export commonly used types for convenience
pub use bus::{Group, NotificationBus, Subscription};
pub use contracts::{
    ApiResponse, GroupRequest, JobDto, StartConversionRequest, StartConversionResponse,
};
pub use domain::{
    Batch, BatchStatus, ConversionOptions, DownloadRecord, GIB, HardwareAcceleration, Job,
    JobStatus, NewJob, ProgressPatch, QualityMode, QuotaConfigError, SpaceCheck, SpaceQuota,
    SpaceUsage, UsageBucket,
};
pub use events::{CleanupDetails, Envelope, Notification, WarningSeverity};
pub use ports::{BatchStore, DownloadStore, SpaceStore, StorageError, TaskStore};
pub use settings::{Settings, SettingsError};
