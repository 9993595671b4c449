//! External step definitions and configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// External commands the pipeline can drive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStep {
    /// ./gradlew compileDebugSources
    Compile,

    /// ./gradlew testDebugUnitTest
    UnitTests,

    /// ./gradlew connectedDebugAndroidTest
    InstrumentedTests,
}

impl BuiltinStep {
    /// Get the step name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStep::Compile => "compile",
            BuiltinStep::UnitTests => "unit_tests",
            BuiltinStep::InstrumentedTests => "instrumented_tests",
        }
    }

    /// Gradle wrapper task producing this step's output.
    pub fn gradle_task(&self) -> &'static str {
        match self {
            BuiltinStep::Compile => "compileDebugSources",
            BuiltinStep::UnitTests => "testDebugUnitTest",
            BuiltinStep::InstrumentedTests => "connectedDebugAndroidTest",
        }
    }

    /// Get the step's Gradle wrapper command.
    pub fn gradle_command(&self) -> Vec<String> {
        vec!["./gradlew".to_string(), self.gradle_task().to_string()]
    }
}

/// Configuration for one external command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepConfig {
    /// Human-readable step name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Timeout in seconds; zero waits indefinitely.
    pub timeout_secs: u64,

    /// Working directory; inherits the process directory when unset.
    pub working_dir: Option<PathBuf>,

    /// Whether this step is enabled.
    pub enabled: bool,
}

impl StepConfig {
    /// Create a step configuration from a builtin Gradle step.
    pub fn from_builtin(step: BuiltinStep, timeout_secs: u64) -> Self {
        Self {
            name: step.name().to_string(),
            command: step.gradle_command(),
            timeout_secs,
            working_dir: None,
            enabled: true,
        }
    }

    /// Create a custom step configuration.
    pub fn custom(name: String, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name,
            command,
            timeout_secs,
            working_dir: None,
            enabled: true,
        }
    }

    /// Run the command from `dir`.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Disable this step.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The command as a single display string.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_step_names() {
        assert_eq!(BuiltinStep::Compile.name(), "compile");
        assert_eq!(BuiltinStep::UnitTests.name(), "unit_tests");
        assert_eq!(BuiltinStep::InstrumentedTests.name(), "instrumented_tests");
    }

    #[test]
    fn test_builtin_step_commands() {
        let cmd = BuiltinStep::UnitTests.gradle_command();
        assert_eq!(cmd[0], "./gradlew");
        assert!(cmd.contains(&"testDebugUnitTest".to_string()));

        let cmd = BuiltinStep::InstrumentedTests.gradle_command();
        assert!(cmd.contains(&"connectedDebugAndroidTest".to_string()));
    }

    #[test]
    fn test_step_config_from_builtin() {
        let config = StepConfig::from_builtin(BuiltinStep::Compile, 300);
        assert_eq!(config.name, "compile");
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.command_line(), "./gradlew compileDebugSources");
        assert!(config.enabled);
    }

    #[test]
    fn test_step_config_custom() {
        let config = StepConfig::custom(
            "my_step".to_string(),
            vec!["echo".to_string(), "hello".to_string()],
            60,
        )
        .in_dir("/tmp");
        assert_eq!(config.name, "my_step");
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp")));
        assert!(config.enabled);
    }

    #[test]
    fn test_step_config_disabled() {
        let config = StepConfig::from_builtin(BuiltinStep::UnitTests, 300).disabled();
        assert!(!config.enabled);
    }
}
