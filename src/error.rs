//! Error kinds for the collection engine.
//!
//! Each variant is one of the distinct, programmatically distinguishable kinds from the
//! error-handling design: stage failures (`MatrixInvalid`, `ConfigInvalid`, `IncompatibleMode`,
//! `ToolUnavailable`) can abort a run; the rest are per-task outcomes folded into
//! [`crate::planner::TaskOutcome`] and never unwind the run themselves.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("matrix invalid: {0}")]
    MatrixInvalid(String),

    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("bulk transfer tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("source missing: {0}")]
    SourceMissing(String),

    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("transient error: {0}")]
    TransientError(String),

    #[error("permanent error: {0}")]
    PermanentError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("incompatible mode: {0}")]
    IncompatibleMode(String),
}
