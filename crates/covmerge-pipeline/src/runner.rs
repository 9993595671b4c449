//! External step execution.

use crate::error::{PipelineError, Result};
use crate::stage::StepConfig;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

/// Result of a step execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name.
    pub step_name: String,

    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StepResult {
    /// Whether this step passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Last lines of stderr, for failure messages.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Runs external commands (compiler, test runners) with a timeout.
pub struct StepRunner;

impl StepRunner {
    /// Execute a single step and return the result.
    ///
    /// A non-zero exit is reported in the result, not as an error. Exceeding
    /// the timeout kills the child and fails with [`PipelineError::Timeout`].
    pub async fn execute(config: &StepConfig) -> Result<StepResult> {
        let start = Instant::now();

        // Validate command
        let Some((exe, args)) = config.command.split_first() else {
            return Err(PipelineError::Config(format!(
                "step {} has an empty command",
                config.name
            )));
        };

        let mut command = Command::new(exe);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        tracing::debug!(step = %config.name, command = %config.command_line(), "spawning step");
        let child = command.spawn().map_err(|e| PipelineError::Failed {
            step: config.name.clone(),
            reason: format!("cannot spawn `{}`: {}", config.command_line(), e),
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let waited = if config.timeout_secs > 0 {
            tokio::time::timeout(
                std::time::Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| PipelineError::Timeout {
                step: config.name.clone(),
                command: config.command_line(),
                timeout_secs: config.timeout_secs,
            })?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|e| PipelineError::Failed {
            step: config.name.clone(),
            reason: format!("waiting for `{}`: {}", config.command_line(), e),
        })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let success = output.status.success();

        Ok(StepResult {
            step_name: config.name.clone(),
            exit_code,
            stdout,
            stderr,
            duration_ms,
            success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_step_result_passed() {
        let result = StepResult {
            step_name: "unit_tests".to_string(),
            exit_code: 0,
            stdout: "".to_string(),
            stderr: "".to_string(),
            duration_ms: 100,
            success: true,
        };
        assert!(result.passed());
    }

    #[test]
    fn test_step_result_failed() {
        let result = StepResult {
            step_name: "unit_tests".to_string(),
            exit_code: 1,
            stdout: "".to_string(),
            stderr: "a\nb\nc".to_string(),
            duration_ms: 100,
            success: false,
        };
        assert!(!result.passed());
        assert_eq!(result.stderr_tail(2), "b\nc");
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let config = StepConfig::custom(
            "echo_test".to_string(),
            vec!["echo".to_string(), "hello".to_string()],
            60,
        );

        let result = StepRunner::execute(&config).await.expect("execute failed");
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let config = StepConfig::custom("false_test".to_string(), vec!["false".to_string()], 60);

        let result = StepRunner::execute(&config).await.expect("execute failed");
        assert!(!result.success);
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let config = StepConfig::custom(
            "sleepy".to_string(),
            vec!["sleep".to_string(), "5".to_string()],
            1,
        );

        let err = StepRunner::execute(&config).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timeout);
        assert!(err.to_string().contains("sleep 5"));
    }

    #[tokio::test]
    async fn test_empty_command_is_config_error() {
        let config = StepConfig::custom("empty".to_string(), Vec::new(), 1);
        let err = StepRunner::execute(&config).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Config);
    }

    #[tokio::test]
    async fn test_missing_executable_fails() {
        let config = StepConfig::custom(
            "ghost".to_string(),
            vec!["covmerge-no-such-binary".to_string()],
            1,
        );
        let err = StepRunner::execute(&config).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Failed);
    }
}
