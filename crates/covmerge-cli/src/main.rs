//! covmerge - merged coverage for Android libraries
//!
//! The `covmerge` command merges unit-test and on-device coverage traces into
//! one report.
//!
//! ## Commands
//!
//! - `run-unit-tests`: run the unit tests (when configured) and stage their trace
//! - `run-android-tests`: run the device tests (when configured) and stage their traces
//! - `compute-coverage`: merge everything staged and write the reports
//! - `pipeline`: all of the above as one run
//! - `print-config`: show the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use covmerge_core::{Counter, CoverageModel, Environment, TraceWarning};
use covmerge_pipeline::{
    CancellationFlag, CoveragePipeline, PipelineConfig, PipelineError, PipelineOptions,
    PipelineResult, StagingResult, StepStatus,
};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

/// Configuration file picked up from the working directory when `--config`
/// is not given.
const DEFAULT_CONFIG_FILE: &str = "covmerge.toml";

#[derive(Parser)]
#[command(name = "covmerge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Merged unit and instrumented test coverage", long_about = None)]
struct Cli {
    /// Configuration file (default: ./covmerge.toml when present)
    #[arg(short, long, global = true, env = "COVMERGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the build output directory
    #[arg(long, global = true)]
    build_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the unit tests and stage their coverage trace
    RunUnitTests {
        /// Only stage what the runner already wrote
        #[arg(long)]
        no_run: bool,
    },

    /// Run the on-device tests and stage their coverage traces
    RunAndroidTests {
        /// Only stage what the runner already wrote
        #[arg(long)]
        no_run: bool,
    },

    /// Merge every staged trace and write the reports
    ComputeCoverage {
        /// Do not run the compile command first
        #[arg(long)]
        no_run: bool,
    },

    /// Run the whole pipeline
    Pipeline {
        /// Do not run or stage the unit tests
        #[arg(long)]
        skip_unit: bool,

        /// Do not run or stage the on-device tests
        #[arg(long)]
        skip_instrumented: bool,

        /// Do not run external commands; stage existing outputs only
        #[arg(long)]
        no_run: bool,

        /// Print the run result as JSON instead of a summary
        #[arg(long)]
        result_json: bool,
    },

    /// Print the effective configuration as TOML
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    covmerge_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref(), cli.build_dir.as_deref())?;

    let code = match cli.command {
        Commands::RunUnitTests { no_run } => cmd_collect(config, Environment::Unit, !no_run).await?,
        Commands::RunAndroidTests { no_run } => {
            cmd_collect(config, Environment::Instrumented, !no_run).await?
        }
        Commands::ComputeCoverage { no_run } => cmd_compute(config, !no_run).await?,
        Commands::Pipeline {
            skip_unit,
            skip_instrumented,
            no_run,
            result_json,
        } => {
            let options = PipelineOptions {
                skip_unit,
                skip_instrumented,
                run_commands: !no_run,
            };
            cmd_pipeline(config, options, result_json).await?
        }
        Commands::PrintConfig => cmd_print_config(&config)?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Resolve the configuration: explicit file, then `./covmerge.toml`, then
/// built-in defaults. `--build-dir` wins over any of them.
fn load_config(path: Option<&Path>, build_dir: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            PipelineConfig::load(Path::new(DEFAULT_CONFIG_FILE))
                .context("Failed to load ./covmerge.toml")?
        }
        None => PipelineConfig::default(),
    };
    Ok(match build_dir {
        Some(dir) => config.with_build_dir(dir),
        None => config,
    })
}

fn new_pipeline(config: PipelineConfig) -> Result<CoveragePipeline> {
    let cancel = CancellationFlag::new();
    cancel.cancel_on_ctrl_c();
    let pipeline = CoveragePipeline::new(config)
        .context("Invalid configuration")?
        .with_cancellation(cancel);
    Ok(pipeline)
}

/// Report a fatal pipeline error and return its exit code.
fn report_failure(err: &PipelineError) -> i32 {
    eprintln!("✗ {} ({})", err, err.kind().as_str());
    err.exit_code()
}

/// Stage one environment's traces
async fn cmd_collect(config: PipelineConfig, environment: Environment, run: bool) -> Result<i32> {
    let pipeline = new_pipeline(config)?;
    info!(run_id = %pipeline.run_id(), %environment, "collecting traces");

    match pipeline.collect(environment, run).await {
        Ok(result) => {
            print_staging(&result);
            Ok(0)
        }
        Err(e) => Ok(report_failure(&e)),
    }
}

/// Merge what is staged and write reports
async fn cmd_compute(config: PipelineConfig, run: bool) -> Result<i32> {
    let pipeline = new_pipeline(config)?;
    let (model, reports) = match pipeline.compute_coverage(run).await {
        Ok(computed) => computed,
        Err(e) => return Ok(report_failure(&e)),
    };

    print_model(&model);
    println!();
    println!(
        "Reports: {} file(s) under {}",
        reports.len(),
        pipeline.context().output_root.display()
    );
    Ok(0)
}

/// Run the whole state machine
async fn cmd_pipeline(config: PipelineConfig, options: PipelineOptions, as_json: bool) -> Result<i32> {
    let pipeline = new_pipeline(config)?;
    let result = pipeline.run(options).await;

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize result")?
        );
    } else {
        print_result(&result, &pipeline.context().output_root);
    }
    Ok(result.exit_code())
}

fn cmd_print_config(config: &PipelineConfig) -> Result<i32> {
    let text = config
        .to_toml_string()
        .context("Failed to render configuration")?;
    print!("{}", text);
    Ok(0)
}

fn print_staging(result: &StagingResult) {
    println!(
        "Staged {} {} artifact(s) into {} ({} bytes, {} ignored)",
        result.artifacts.len(),
        result.environment,
        result.staging_dir.display(),
        result.total_bytes(),
        result.ignored
    );
    for staged in &result.artifacts {
        println!(
            "  {} ({} bytes, sha256 {})",
            staged.artifact.path.display(),
            staged.size,
            &staged.sha256[..12.min(staged.sha256.len())]
        );
    }
}

fn print_warnings<'a>(warnings: impl Iterator<Item = &'a TraceWarning>) {
    let warnings: Vec<_> = warnings.collect();
    if warnings.is_empty() {
        return;
    }
    println!("Skipped traces:");
    for warning in warnings {
        println!(
            "  ! [{}] {}: {}",
            warning.environment,
            warning.path.display(),
            warning.reason
        );
    }
}

/// Class coverage first: it is the figure that counts unexecuted classes.
fn print_totals(classes: Counter, executed_probes: Counter) {
    println!(
        "Classes: {}/{} covered ({:.1}%)",
        classes.covered,
        classes.total(),
        classes.percent()
    );
    println!(
        "Probes in executed classes: {}/{} covered ({:.1}%)",
        executed_probes.covered,
        executed_probes.total(),
        executed_probes.percent()
    );
}

fn print_model(model: &CoverageModel) {
    print_totals(model.class_counter(), model.executed_probe_counter());
    println!("Sessions: {}", model.sessions().count());
    print_warnings(model.warnings());
}

fn print_result(result: &PipelineResult, output_root: &Path) {
    println!("Run ID: {}", result.run_id);
    println!("Started: {}", result.started_at.to_rfc3339());
    println!(
        "Status: {}",
        if result.success() { "✓ DONE" } else { "✗ FAILED" }
    );
    println!("Duration: {}ms", result.duration_ms);
    println!();

    for step in &result.steps {
        let mark = match step.status {
            StepStatus::Completed => "✓",
            StepStatus::Skipped => "-",
            StepStatus::Failed => "✗",
        };
        match &step.detail {
            Some(detail) => println!("  {} {} ({}ms): {}", mark, step.state, step.duration_ms, detail),
            None => println!("  {} {} ({}ms)", mark, step.state, step.duration_ms),
        }
    }

    if let Some(totals) = &result.totals {
        println!();
        print_totals(totals.classes, totals.executed_probes);
    }
    print_warnings(result.warnings.iter());

    match &result.failure {
        Some(failure) => {
            println!();
            println!("Failure ({}): {}", failure.kind.as_str(), failure.message);
        }
        None => {
            println!();
            println!("Reports written under {}", output_root.display());
        }
    }
}
