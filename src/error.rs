//! Error types for the verifier core.
//!
//! Every kind here is recoverable at the outer driver: the Comparator never
//! panics on a failure, it folds it into a `mismatch` row or a `mismatch`
//! verdict with the kind attached to `summary.error`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("unreadable or unrecognized artifact header at {path}: {reason}")]
    LoadError { path: String, reason: String },

    #[error("no interpreter or disassembler support available for {0}")]
    ToolNotFound(String),

    #[error("external step exceeded its {0}s wall-clock budget")]
    ToolTimeout(u64),

    #[error("external step exited non-zero: {0}")]
    ToolFailure(String),

    #[error("path '{0}' is ambiguous without --index")]
    PathAmbiguous(String),

    #[error("path '{0}' did not resolve to any code object")]
    PathMissing(String),

    #[error("recompiled artifact version {got:?} does not match original {expected:?}")]
    VersionMismatch {
        expected: (u16, u16),
        got: (u16, u16),
    },

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("malformed marshal stream: {0}")]
    MarshalError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VerifyError>;
