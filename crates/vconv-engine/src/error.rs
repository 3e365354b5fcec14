//! Engine error taxonomy.

use vconv_core::{SpaceCheck, StorageError};

/// Errors surfaced by the conversion service and runner internals.
///
/// The runner itself never lets one of these escape its task: every exit
/// path writes a terminal job status instead. The service layer returns them
/// to the HTTP surface, which is the only layer translating errors into
/// user-visible responses.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The encoder child process could not be spawned.
    #[error(
        "failed to start the encoder: {0}; ensure FFmpeg is installed and \
         the configured path points at the binary"
    )]
    EncoderStart(String),

    /// The encoder exited non-zero; carries the trailing stderr window.
    #[error("encoder failed: {0}")]
    EncoderRuntime(String),

    /// The encoder emitted no progress for the configured window.
    #[error("encoder stalled")]
    EncoderStall,

    /// The job was cancelled by the user.
    #[error("user cancelled")]
    Cancelled,

    /// Admission refused by the space governor; no job row was created.
    #[error(
        "insufficient storage: {} bytes required, {} available (short {})",
        check.required_bytes,
        check.available_bytes,
        check.shortfall_bytes
    )]
    Quota {
        /// The failed admission result.
        check: SpaceCheck,
    },

    /// The request named a preset the library does not know.
    #[error("unknown preset '{0}'")]
    UnknownPreset(String),

    /// The addressed job does not exist.
    #[error("unknown job '{0}'")]
    UnknownJob(String),

    /// The store refused an operation (already retried once).
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Space subsystem failure during admission or tracking.
    #[error(transparent)]
    Space(#[from] vconv_space::SpaceError),
}

impl EngineError {
    /// The wire `errorType` discriminator for API responses.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::EncoderStart(_) => "EncoderStartError",
            Self::EncoderRuntime(_) => "EncoderRuntimeError",
            Self::EncoderStall => "EncoderStallError",
            Self::Cancelled => "CancelledError",
            Self::Quota { .. } => "QuotaError",
            Self::UnknownPreset(_) | Self::UnknownJob(_) => "NotFoundError",
            Self::Storage(_) => "StorageError",
            Self::Space(_) => "IOError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_error_reports_shortfall() {
        let err = EngineError::Quota {
            check: SpaceCheck {
                sufficient: false,
                required_bytes: 100,
                available_bytes: 25,
                shortfall_bytes: 75,
            },
        };
        let text = err.to_string();
        assert!(text.contains("100"));
        assert!(text.contains("short 75"));
        assert_eq!(err.error_type(), "QuotaError");
    }

    #[test]
    fn start_error_carries_remediation() {
        let err = EngineError::EncoderStart("No such file or directory".into());
        assert!(err.to_string().contains("ensure FFmpeg is installed"));
    }
}
