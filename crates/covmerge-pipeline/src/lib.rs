//! covmerge pipeline - staging and orchestration
//!
//! Provides the coverage pipeline orchestrator that:
//! - Runs the compiler and both test runners as external steps
//! - Stages their trace artifacts into stable directories
//! - Merges everything staged and writes the reports

pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod runner;
pub mod stage;

// Re-export key types
pub use collector::{stage, StagedArtifact, StagingResult};
pub use config::{CommandsConfig, PathsConfig, PipelineConfig, TimeoutsConfig};
pub use context::{RunContext, OUTPUT_ROOT, STAGING_ROOT};
pub use error::{Failure, FailureKind, PipelineError, Result};
pub use pipeline::{
    CancellationFlag, CoveragePipeline, CoverageTotals, PipelineOptions, PipelineResult,
    PipelineState, StepOutcome, StepStatus,
};
pub use runner::{StepResult, StepRunner};
pub use stage::{BuiltinStep, StepConfig};
