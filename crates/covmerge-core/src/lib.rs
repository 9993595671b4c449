//! covmerge core library
//!
//! Trace codec, compiled-class scanning, exclusion filtering, probe-wise
//! merging and report rendering for Android coverage pipelines.

pub mod classes;
pub mod domain;
pub mod exec;
pub mod filter;
pub mod merge;
pub mod model;
pub mod obs;
pub mod report;
pub mod sources;
pub mod telemetry;

pub use classes::{require_class_root, ClassSet, CompiledClass, CompiledClassSet, FilteredClassSet};

pub use domain::{
    list_staged, CovError, Environment, Result, TraceArtifact, TraceError, EXTERNAL_PRODUCER,
};

pub use exec::{
    class_id, read_exec, read_exec_file, write_exec, write_exec_file, ExecutionData,
    ExecutionStore, SessionInfo,
};

pub use filter::{filter, ExclusionRule, ExclusionRules, RuleKind, DEFAULT_EXCLUSIONS};

pub use merge::{merge, merge_traces, UnreadablePolicy};

pub use model::{
    ClassCoverage, ClassStatus, Counter, CoverageModel, PackageCoverage, TraceWarning,
};

pub use report::{
    write_reports, CoverageSummary, ReportLayout, ReportMeta, ReportRenderer,
};

pub use sources::SourceDirectorySet;

pub use telemetry::init_tracing;

/// Crate version, reported by the CLI and in report metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
