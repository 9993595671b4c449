//! Pipeline configuration.
//!
//! One explicit struct, loaded from TOML. Every field has a documented
//! default; a missing file section falls back to it.
//!
//! ```toml
//! project_dir = "."
//! build_dir = "build"
//! report_name = "cameraview"
//! fail_on_unreadable_trace = false
//! exclusions = ["**/R.class", "**/R$*.class"]
//!
//! [paths]
//! unit_producer = "outputs/unit_test_code_coverage/debugUnitTest/testDebugUnitTest.exec"
//!
//! [commands]
//! gradle = true
//!
//! [timeouts]
//! instrumented_tests_secs = 3600
//! ```

use covmerge_core::{ExclusionRules, UnreadablePolicy, DEFAULT_EXCLUSIONS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::stage::{BuiltinStep, StepConfig};

/// Producer, class and source locations.
///
/// Producer and class paths are relative to the build directory; source roots
/// to the project directory; generated source roots to the build directory.
/// Absolute paths are used as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Unit-test trace written by the unit test runner (file or directory).
    pub unit_producer: PathBuf,

    /// Directory the on-device runner pulls `*coverage.ec` files into.
    pub instrumented_producer: PathBuf,

    /// Root of the compiled `.class` files.
    pub class_root: PathBuf,

    /// Authored source roots.
    pub source_roots: Vec<PathBuf>,

    /// Generated source roots (build config, resources).
    pub generated_source_roots: Vec<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            unit_producer: PathBuf::from(
                "outputs/unit_test_code_coverage/debugUnitTest/testDebugUnitTest.exec",
            ),
            instrumented_producer: PathBuf::from("outputs/code_coverage/debugAndroidTest/connected"),
            class_root: PathBuf::from("intermediates/javac/debug"),
            source_roots: vec![PathBuf::from("src/main/java")],
            generated_source_roots: vec![
                PathBuf::from("generated/source/buildConfig/debug"),
                PathBuf::from("generated/source/r/debug"),
            ],
        }
    }
}

/// External commands. Unset commands are not run; the pipeline then only
/// stages whatever the producers already wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandsConfig {
    /// Use the Gradle wrapper tasks for every command left unset.
    pub gradle: bool,

    pub compile: Option<Vec<String>>,
    pub unit_tests: Option<Vec<String>>,
    pub instrumented_tests: Option<Vec<String>>,
}

/// Per-step timeouts in seconds; zero waits indefinitely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutsConfig {
    pub compile_secs: u64,
    pub unit_tests_secs: u64,
    pub instrumented_tests_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            compile_secs: 600,
            unit_tests_secs: 1_800,
            instrumented_tests_secs: 3_600,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Library project directory.
    pub project_dir: PathBuf,

    /// Build output root, relative to `project_dir` unless absolute.
    pub build_dir: PathBuf,

    /// Title used in every report.
    pub report_name: String,

    /// Treat an unreadable trace as fatal instead of skipping it.
    pub fail_on_unreadable_trace: bool,

    /// Exclusion patterns applied to compiled class paths.
    pub exclusions: Vec<String>,

    pub paths: PathsConfig,
    pub commands: CommandsConfig,
    pub timeouts: TimeoutsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            build_dir: PathBuf::from("build"),
            report_name: "coverage".to_string(),
            fail_on_unreadable_trace: false,
            exclusions: DEFAULT_EXCLUSIONS.iter().map(|p| p.to_string()).collect(),
            paths: PathsConfig::default(),
            commands: CommandsConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// A relative `project_dir` is resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content).map_err(|e| match e {
            PipelineError::Config(msg) => {
                PipelineError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        if config.project_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.project_dir = parent.join(&config.project_dir);
            }
        }
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Check every field that can be wrong independently of the filesystem.
    pub fn validate(&self) -> Result<()> {
        self.exclusion_rules()?;
        if self.report_name.trim().is_empty() {
            return Err(PipelineError::Config("report_name must not be empty".into()));
        }
        for (name, command) in [
            ("compile", &self.commands.compile),
            ("unit_tests", &self.commands.unit_tests),
            ("instrumented_tests", &self.commands.instrumented_tests),
        ] {
            if command.as_ref().is_some_and(|c| c.is_empty()) {
                return Err(PipelineError::Config(format!(
                    "commands.{} must not be empty",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Compile the exclusion patterns.
    pub fn exclusion_rules(&self) -> Result<ExclusionRules> {
        ExclusionRules::new(&self.exclusions).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn unreadable_policy(&self) -> UnreadablePolicy {
        if self.fail_on_unreadable_trace {
            UnreadablePolicy::Fail
        } else {
            UnreadablePolicy::SkipWithWarning
        }
    }

    /// Override the build directory (CLI `--build-dir`).
    pub fn with_build_dir(mut self, build_dir: impl Into<PathBuf>) -> Self {
        self.build_dir = build_dir.into();
        self
    }

    /// The command configured for `step`, if any.
    pub fn step(&self, step: BuiltinStep) -> Option<StepConfig> {
        let (explicit, timeout_secs) = match step {
            BuiltinStep::Compile => (&self.commands.compile, self.timeouts.compile_secs),
            BuiltinStep::UnitTests => (&self.commands.unit_tests, self.timeouts.unit_tests_secs),
            BuiltinStep::InstrumentedTests => (
                &self.commands.instrumented_tests,
                self.timeouts.instrumented_tests_secs,
            ),
        };

        let config = match explicit {
            Some(command) => {
                StepConfig::custom(step.name().to_string(), command.clone(), timeout_secs)
            }
            None if self.commands.gradle => StepConfig::from_builtin(step, timeout_secs),
            None => return None,
        };
        Some(config.in_dir(&self.project_dir))
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))
    }
}
