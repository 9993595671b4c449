//! Error taxonomy for the coverage core.

use std::path::PathBuf;

/// Errors produced while decoding an execution-data trace.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("invalid execution data: expected header block, found block type {0:#04x}")]
    MissingHeader(u8),

    #[error("invalid execution data: bad magic number {0:#06x}")]
    BadMagic(u16),

    #[error("incompatible execution data version {found:#06x} (supported: {expected:#06x})")]
    IncompatibleVersion { found: u16, expected: u16 },

    #[error("unknown block type {0:#04x}")]
    UnknownBlock(u8),

    #[error("unexpected end of execution data")]
    Truncated,

    #[error("malformed string in execution data")]
    InvalidString,

    #[error("probe array length {0} exceeds the supported maximum")]
    ProbeArrayTooLarge(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coverage core errors.
#[derive(Debug, thiserror::Error)]
pub enum CovError {
    #[error("invalid exclusion pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("unreadable trace {path}: {source}")]
    UnreadableTrace {
        path: PathBuf,
        #[source]
        source: TraceError,
    },

    #[error("cannot scan compiled classes under {path}: {source}")]
    ClassScan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write report {path}: {source}")]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for coverage core operations.
pub type Result<T> = std::result::Result<T, CovError>;
