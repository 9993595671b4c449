//! Pipeline failure taxonomy and exit codes.

use covmerge_core::CovError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Fatal pipeline errors. Each names the step and the path or command involved.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("[{step}] missing artifact {path}: {reason}")]
    MissingArtifact {
        step: String,
        path: PathBuf,
        reason: String,
    },

    #[error("[{step}] copy failed for {path}: {source}")]
    CopyFailed {
        step: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[{step}] unreadable trace {path}: {reason}")]
    UnreadableTrace {
        step: String,
        path: PathBuf,
        reason: String,
    },

    #[error("[{step}] `{command}` timed out after {timeout_secs}s")]
    Timeout {
        step: String,
        command: String,
        timeout_secs: u64,
    },

    #[error("[{step}] aborted before the step started")]
    Aborted { step: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("[{step}] failed: {reason}")]
    Failed { step: String, reason: String },
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Kind of a pipeline failure, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingArtifact,
    CopyFailed,
    UnreadableTrace,
    Timeout,
    Aborted,
    Config,
    Failed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MissingArtifact => "missing_artifact",
            FailureKind::CopyFailed => "copy_failed",
            FailureKind::UnreadableTrace => "unreadable_trace",
            FailureKind::Timeout => "timeout",
            FailureKind::Aborted => "aborted",
            FailureKind::Config => "config",
            FailureKind::Failed => "failed",
        }
    }

    /// Process exit code reported for this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            FailureKind::MissingArtifact => 3,
            FailureKind::CopyFailed => 4,
            FailureKind::UnreadableTrace => 5,
            FailureKind::Timeout => 6,
            FailureKind::Aborted => 130,
            FailureKind::Config | FailureKind::Failed => 1,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::MissingArtifact { .. } => FailureKind::MissingArtifact,
            PipelineError::CopyFailed { .. } => FailureKind::CopyFailed,
            PipelineError::UnreadableTrace { .. } => FailureKind::UnreadableTrace,
            PipelineError::Timeout { .. } => FailureKind::Timeout,
            PipelineError::Aborted { .. } => FailureKind::Aborted,
            PipelineError::Config(_) => FailureKind::Config,
            PipelineError::Failed { .. } => FailureKind::Failed,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// Classify a coverage core error raised while running `step`.
    pub fn from_core(step: &str, err: CovError) -> Self {
        match err {
            CovError::UnreadableTrace { path, source } => PipelineError::UnreadableTrace {
                step: step.to_string(),
                path,
                reason: source.to_string(),
            },
            CovError::InvalidPattern { .. } => PipelineError::Config(err.to_string()),
            other => PipelineError::Failed {
                step: step.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Serializable record of a fatal error, kept in the pipeline result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&PipelineError> for Failure {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
