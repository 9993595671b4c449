//! Structured observability hooks for pipeline lifecycle events.
//!
//! This module provides:
//! - The run-scoped `covmerge.run` span via `run_span`
//! - Emission functions for step lifecycle, staging and trace events
//!
//! Events are emitted at `info!` level (`warn!` for failures and skipped
//! traces). Filter with `COVMERGE_LOG` or `RUST_LOG`.

use std::path::Path;
use tracing::{info, warn};

/// The span every event of one run is recorded under.
///
/// Attach it to the run's future with `tracing::Instrument`; an entered
/// guard must not be held across `.await`.
///
/// # Example
///
/// ```ignore
/// pipeline.run(options).instrument(run_span("6f1c...")).await;
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("covmerge.run", run_id = %run_id)
}

/// Emit event: a pipeline step started.
pub fn emit_step_started(run_id: &str, step: &str) {
    info!(event = "step.started", run_id = %run_id, step = %step);
}

/// Emit event: a pipeline step finished successfully.
pub fn emit_step_finished(run_id: &str, step: &str, duration_ms: u64) {
    info!(
        event = "step.finished",
        run_id = %run_id,
        step = %step,
        duration_ms = duration_ms,
    );
}

/// Emit event: a pipeline step failed (warning level).
pub fn emit_step_failed(run_id: &str, step: &str, error: &dyn std::fmt::Display) {
    warn!(event = "step.failed", run_id = %run_id, step = %step, error = %error);
}

/// Emit event: an artifact was staged.
pub fn emit_artifact_staged(run_id: &str, environment: &str, path: &Path, bytes: u64) {
    info!(
        event = "artifact.staged",
        run_id = %run_id,
        environment = %environment,
        path = %path.display(),
        bytes = bytes,
    );
}

/// Emit event: an unreadable trace was skipped (warning level).
pub fn emit_trace_skipped(run_id: &str, path: &Path, reason: &str) {
    warn!(event = "trace.skipped", run_id = %run_id, path = %path.display(), reason = %reason);
}

/// Emit event: pipeline finished with final state, duration and coverage.
pub fn emit_pipeline_finished(
    run_id: &str,
    final_state: &str,
    duration_ms: u64,
    class_percent: f64,
    success: bool,
) {
    info!(
        event = "pipeline.finished",
        run_id = %run_id,
        final_state = %final_state,
        duration_ms = duration_ms,
        class_percent = class_percent,
        success = success,
    );
}
