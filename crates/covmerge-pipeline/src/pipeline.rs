//! Coverage pipeline orchestration.
//!
//! A run walks a linear state machine:
//!
//! ```text
//! Idle → ClassesCompiled → UnitTracesStaged → InstrumentedTracesStaged
//!      → Merged → ReportsWritten → Done
//! ```
//!
//! Any fatal error moves the run to `Failed` and no later step runs. A new
//! run always starts from `Idle`.

use covmerge_core::obs::{
    emit_pipeline_finished, emit_step_failed, emit_step_finished, emit_step_started,
    emit_trace_skipped, run_span,
};
use covmerge_core::{
    filter, list_staged, merge, require_class_root, write_reports, ClassSet, Counter,
    CoverageModel, Environment, ExclusionRules, ReportMeta, TraceArtifact, TraceWarning,
    EXTERNAL_PRODUCER,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Instrument};

use crate::collector::{stage, StagingResult};
use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::error::{Failure, PipelineError, Result};
use crate::runner::{StepResult, StepRunner};
use crate::stage::BuiltinStep;

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    ClassesCompiled,
    UnitTracesStaged,
    InstrumentedTracesStaged,
    Merged,
    ReportsWritten,
    Done,
    Failed,
}

impl PipelineState {
    /// The working states, in execution order.
    pub const STEPS: [PipelineState; 5] = [
        PipelineState::ClassesCompiled,
        PipelineState::UnitTracesStaged,
        PipelineState::InstrumentedTracesStaged,
        PipelineState::Merged,
        PipelineState::ReportsWritten,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::ClassesCompiled => "classes_compiled",
            PipelineState::UnitTracesStaged => "unit_traces_staged",
            PipelineState::InstrumentedTracesStaged => "instrumented_traces_staged",
            PipelineState::Merged => "merged",
            PipelineState::ReportsWritten => "reports_written",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    /// Successor on success; `None` for terminal states.
    pub fn next(&self) -> Option<PipelineState> {
        match self {
            PipelineState::Idle => Some(PipelineState::ClassesCompiled),
            PipelineState::ClassesCompiled => Some(PipelineState::UnitTracesStaged),
            PipelineState::UnitTracesStaged => Some(PipelineState::InstrumentedTracesStaged),
            PipelineState::InstrumentedTracesStaged => Some(PipelineState::Merged),
            PipelineState::Merged => Some(PipelineState::ReportsWritten),
            PipelineState::ReportsWritten => Some(PipelineState::Done),
            PipelineState::Done | PipelineState::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work performed to enter each working state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    CompileClasses,
    Stage(Environment),
    Merge,
    WriteReports,
}

impl Step {
    const ORDER: [Step; 5] = [
        Step::CompileClasses,
        Step::Stage(Environment::Unit),
        Step::Stage(Environment::Instrumented),
        Step::Merge,
        Step::WriteReports,
    ];

    fn state(self) -> PipelineState {
        match self {
            Step::CompileClasses => PipelineState::ClassesCompiled,
            Step::Stage(Environment::Unit) => PipelineState::UnitTracesStaged,
            Step::Stage(Environment::Instrumented) => PipelineState::InstrumentedTracesStaged,
            Step::Merge => PipelineState::Merged,
            Step::WriteReports => PipelineState::ReportsWritten,
        }
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub skip_unit: bool,
    pub skip_instrumented: bool,
    /// Run configured external commands before staging.
    pub run_commands: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            skip_unit: false,
            skip_instrumented: false,
            run_commands: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Skipped,
    Failed,
}

/// Outcome of one transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub state: PipelineState,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
}

/// Overall counters of the merged model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageTotals {
    pub classes: Counter,
    /// Probes of classes with execution data only; gate on `classes`.
    pub executed_probes: Counter,
    pub sessions: usize,
}

/// Result of a complete pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub final_state: PipelineState,
    /// Every state entered, starting with `Idle`.
    pub history: Vec<PipelineState>,
    pub steps: Vec<StepOutcome>,
    pub staging: Vec<StagingResult>,
    pub totals: Option<CoverageTotals>,
    pub warnings: Vec<TraceWarning>,
    pub reports: Vec<PathBuf>,
    pub failure: Option<Failure>,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn success(&self) -> bool {
        self.final_state == PipelineState::Done
    }

    /// Process exit code: 0 on `Done`, otherwise the failure kind's code.
    pub fn exit_code(&self) -> i32 {
        match &self.failure {
            None if self.success() => 0,
            Some(failure) => failure.kind.exit_code(),
            None => 1,
        }
    }
}

/// Shared flag the caller sets to stop a run between steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set the flag on Ctrl-C. Must be called inside a tokio runtime.
    pub fn cancel_on_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping after the current step");
                flag.cancel();
            }
        });
    }
}

/// Coverage pipeline bound to one resolved run context.
pub struct CoveragePipeline {
    config: PipelineConfig,
    ctx: RunContext,
    rules: ExclusionRules,
    cancel: CancellationFlag,
}

impl CoveragePipeline {
    /// Validate `config` and resolve a fresh run context.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let rules = config.exclusion_rules()?;
        let ctx = RunContext::from_config(&config);
        Ok(Self {
            config,
            ctx,
            rules,
            cancel: CancellationFlag::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.ctx.run_id
    }

    /// Run a configured external command, failing on a non-zero exit.
    async fn run_command(&self, step: BuiltinStep, state: PipelineState) -> Result<Option<StepResult>> {
        let Some(config) = self.config.step(step) else {
            return Ok(None);
        };
        if !config.enabled {
            info!(step = %config.name, "skipping disabled step");
            return Ok(None);
        }

        info!(step = %config.name, command = %config.command_line(), "running external command");
        let result = StepRunner::execute(&config).await.map_err(|e| match e {
            PipelineError::Timeout {
                command,
                timeout_secs,
                ..
            } => PipelineError::Timeout {
                step: state.as_str().to_string(),
                command,
                timeout_secs,
            },
            other => other,
        })?;
        if !result.passed() {
            return Err(PipelineError::Failed {
                step: state.as_str().to_string(),
                reason: format!(
                    "`{}` exited with code {}: {}",
                    config.command_line(),
                    result.exit_code,
                    result.stderr_tail(5)
                ),
            });
        }
        Ok(Some(result))
    }

    /// Compile (when configured) and require the compiled-class root.
    pub async fn compile_classes(&self, run_commands: bool) -> Result<()> {
        let state = PipelineState::ClassesCompiled;
        if run_commands {
            self.run_command(BuiltinStep::Compile, state).await?;
        }
        require_class_root(&self.ctx.class_root).map_err(|e| PipelineError::MissingArtifact {
            step: state.as_str().to_string(),
            path: self.ctx.class_root.clone(),
            reason: format!("compiled classes not found: {}", e),
        })?;
        Ok(())
    }

    /// Run the environment's test command (when configured), then stage its
    /// traces.
    pub async fn collect(&self, environment: Environment, run_commands: bool) -> Result<StagingResult> {
        let (step, state) = match environment {
            Environment::Unit => (BuiltinStep::UnitTests, PipelineState::UnitTracesStaged),
            Environment::Instrumented => (
                BuiltinStep::InstrumentedTests,
                PipelineState::InstrumentedTracesStaged,
            ),
        };
        if run_commands {
            self.run_command(step, state).await?;
        }
        stage(
            environment,
            self.ctx.producer(environment),
            self.ctx.staging_dir(environment),
            &self.ctx.run_id,
        )
    }

    /// Every trace currently staged for both environments, tagged as staged
    /// by an earlier invocation.
    pub fn staged_traces(&self) -> Result<Vec<TraceArtifact>> {
        let mut traces = Vec::new();
        for environment in Environment::ALL {
            let dir = self.ctx.staging_dir(environment);
            let listed = list_staged(environment, dir, EXTERNAL_PRODUCER).map_err(|e| {
                PipelineError::Failed {
                    step: PipelineState::Merged.as_str().to_string(),
                    reason: format!("cannot list {}: {}", dir.display(), e),
                }
            })?;
            traces.extend(listed);
        }
        Ok(traces)
    }

    /// Scan and filter the compiled classes, then merge `traces` against them.
    pub fn compute(&self, traces: &[TraceArtifact]) -> Result<CoverageModel> {
        let step = PipelineState::Merged.as_str();
        let compiled = ClassSet::scan(&self.ctx.class_root)
            .map_err(|e| PipelineError::from_core(step, e))?;
        let filtered = filter(&compiled, &self.rules);

        let model = merge(
            traces,
            &filtered,
            &self.ctx.sources,
            self.config.unreadable_policy(),
        )
        .map_err(|e| PipelineError::from_core(step, e))?;

        for warning in model.warnings() {
            emit_trace_skipped(&self.ctx.run_id, &warning.path, &warning.reason);
        }
        info!(
            compiled = compiled.len(),
            filtered = filtered.len(),
            traces = traces.len(),
            "computed coverage"
        );
        Ok(model)
    }

    /// Write every rendering of `model`.
    pub fn write_reports(&self, model: &CoverageModel) -> Result<Vec<PathBuf>> {
        let meta = ReportMeta::new(self.config.report_name.clone());
        write_reports(model, &meta, &self.ctx.report_layout())
            .map_err(|e| PipelineError::from_core(PipelineState::ReportsWritten.as_str(), e))
    }

    /// Merge everything currently staged, whoever staged it, and write the
    /// reports.
    pub async fn compute_coverage(&self, run_commands: bool) -> Result<(CoverageModel, Vec<PathBuf>)> {
        async {
            self.compile_classes(run_commands).await?;
            let traces = self.staged_traces()?;
            let model = self.compute(&traces)?;
            let reports = self.write_reports(&model)?;
            Ok::<_, PipelineError>((model, reports))
        }
        .instrument(run_span(&self.ctx.run_id))
        .await
    }

    /// Execute the whole state machine.
    ///
    /// Only traces staged by this run are merged; a skipped environment
    /// contributes nothing. Never returns an error: failures end the run in
    /// `Failed` and are recorded in the result.
    pub async fn run(&self, options: PipelineOptions) -> PipelineResult {
        self.run_steps(options)
            .instrument(run_span(&self.ctx.run_id))
            .await
    }

    async fn run_steps(&self, options: PipelineOptions) -> PipelineResult {
        let start = Instant::now();
        let started_at = Utc::now();
        let run_id = self.ctx.run_id.clone();
        info!(run_id = %run_id, build_dir = %self.ctx.build_dir.display(), "starting coverage pipeline");

        let mut history = vec![PipelineState::Idle];
        let mut steps = Vec::new();
        let mut staging: Vec<StagingResult> = Vec::new();
        let mut model: Option<CoverageModel> = None;
        let mut reports = Vec::new();
        let mut failure = None;

        for work in Step::ORDER {
            let state = work.state();
            let step = state.as_str();
            if self.cancel.is_cancelled() {
                let err = PipelineError::Aborted {
                    step: step.to_string(),
                };
                emit_step_failed(&run_id, step, &err);
                failure = Some(Failure::from(&err));
                history.push(PipelineState::Failed);
                break;
            }

            emit_step_started(&run_id, step);
            let step_start = Instant::now();

            let outcome: Result<(StepStatus, Option<String>)> = match work {
                Step::CompileClasses => self
                    .compile_classes(options.run_commands)
                    .await
                    .map(|_| (StepStatus::Completed, None)),
                Step::Stage(environment) => {
                    let skip = match environment {
                        Environment::Unit => options.skip_unit,
                        Environment::Instrumented => options.skip_instrumented,
                    };
                    if skip {
                        Ok((StepStatus::Skipped, Some(format!("{} skipped", environment))))
                    } else {
                        match self.collect(environment, options.run_commands).await {
                            Ok(result) => {
                                let detail = format!(
                                    "{} artifact(s) staged, {} ignored",
                                    result.artifacts.len(),
                                    result.ignored
                                );
                                staging.push(result);
                                Ok((StepStatus::Completed, Some(detail)))
                            }
                            Err(e) => Err(e),
                        }
                    }
                }
                Step::Merge => {
                    let traces: Vec<TraceArtifact> =
                        staging.iter().flat_map(|s| s.traces().cloned()).collect();
                    self.compute(&traces).map(|merged| {
                        let detail = format!(
                            "{} class(es), {} skipped trace(s)",
                            merged.class_count(),
                            merged.skipped_count()
                        );
                        model = Some(merged);
                        (StepStatus::Completed, Some(detail))
                    })
                }
                Step::WriteReports => match model.as_ref() {
                    Some(merged) => self.write_reports(merged).map(|files| {
                        let detail = format!("{} file(s) written", files.len());
                        reports = files;
                        (StepStatus::Completed, Some(detail))
                    }),
                    None => Err(PipelineError::Failed {
                        step: step.to_string(),
                        reason: "no merged coverage model".to_string(),
                    }),
                },
            };

            let duration_ms = step_start.elapsed().as_millis() as u64;
            match outcome {
                Ok((status, detail)) => {
                    emit_step_finished(&run_id, step, duration_ms);
                    steps.push(StepOutcome {
                        state,
                        status,
                        duration_ms,
                        detail,
                    });
                    history.push(state);
                }
                Err(e) => {
                    emit_step_failed(&run_id, step, &e);
                    steps.push(StepOutcome {
                        state,
                        status: StepStatus::Failed,
                        duration_ms,
                        detail: Some(e.to_string()),
                    });
                    failure = Some(Failure::from(&e));
                    history.push(PipelineState::Failed);
                    break;
                }
            }
        }

        let final_state = if failure.is_none() {
            history.push(PipelineState::Done);
            PipelineState::Done
        } else {
            PipelineState::Failed
        };

        let totals = model.as_ref().map(|m| CoverageTotals {
            classes: m.class_counter(),
            executed_probes: m.executed_probe_counter(),
            sessions: m.sessions().count(),
        });
        let warnings = model
            .as_ref()
            .map(|m| m.warnings().cloned().collect())
            .unwrap_or_default();
        let duration_ms = start.elapsed().as_millis() as u64;

        emit_pipeline_finished(
            &run_id,
            final_state.as_str(),
            duration_ms,
            totals.as_ref().map(|t| t.classes.percent()).unwrap_or(0.0),
            failure.is_none(),
        );

        PipelineResult {
            run_id,
            started_at,
            final_state,
            history,
            steps,
            staging,
            totals,
            warnings,
            reports,
            failure,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_order() {
        let mut state = PipelineState::Idle;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            seen.push(next);
            state = next;
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(seen[1..6], PipelineState::STEPS);
        assert_eq!(state, PipelineState::Done);
        assert!(PipelineState::Failed.is_terminal());
    }

    #[test]
    fn test_steps_enter_working_states_in_order() {
        let states: Vec<_> = Step::ORDER.iter().map(|s| s.state()).collect();
        assert_eq!(states, PipelineState::STEPS);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            PipelineState::InstrumentedTracesStaged.to_string(),
            "instrumented_traces_staged"
        );
    }

    #[test]
    fn test_cancellation_flag_shared() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_exit_code_from_result() {
        let mut result = PipelineResult {
            run_id: "r".to_string(),
            started_at: Utc::now(),
            final_state: PipelineState::Done,
            history: vec![PipelineState::Idle, PipelineState::Done],
            steps: Vec::new(),
            staging: Vec::new(),
            totals: None,
            warnings: Vec::new(),
            reports: Vec::new(),
            failure: None,
            duration_ms: 0,
        };
        assert_eq!(result.exit_code(), 0);

        result.final_state = PipelineState::Failed;
        result.failure = Some(Failure {
            kind: crate::error::FailureKind::Timeout,
            message: "timed out".to_string(),
        });
        assert_eq!(result.exit_code(), 6);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            exclusions: vec!["../x".to_string()],
            ..PipelineConfig::default()
        };
        assert!(CoveragePipeline::new(config).is_err());
    }
}
