//! Test execution environments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two independent test execution contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Local JVM unit tests.
    Unit,

    /// On-device instrumented tests.
    Instrumented,
}

impl Environment {
    /// Both environments, in pipeline order.
    pub const ALL: [Environment; 2] = [Environment::Unit, Environment::Instrumented];

    /// Stable tag used in logs, reports and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Unit => "unit",
            Environment::Instrumented => "instrumented",
        }
    }

    /// Name of the staging subdirectory under `coverage_input/`.
    ///
    /// External automation locates staged traces by these names.
    pub fn staging_dir_name(&self) -> &'static str {
        match self {
            Environment::Unit => "unit_tests",
            Environment::Instrumented => "android_tests",
        }
    }

    /// File-name suffix an artifact must carry to be staged, if any.
    pub fn artifact_suffix(&self) -> Option<&'static str> {
        match self {
            Environment::Unit => None,
            Environment::Instrumented => Some("coverage.ec"),
        }
    }

    /// Whether a producer file with this name is a trace artifact for the environment.
    pub fn accepts(&self, file_name: &str) -> bool {
        match self.artifact_suffix() {
            Some(suffix) => file_name.ends_with(suffix),
            None => true,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unit" => Ok(Environment::Unit),
            "instrumented" | "android" => Ok(Environment::Instrumented),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_dir_names_are_stable() {
        assert_eq!(Environment::Unit.staging_dir_name(), "unit_tests");
        assert_eq!(Environment::Instrumented.staging_dir_name(), "android_tests");
    }

    #[test]
    fn test_instrumented_accepts_only_coverage_ec() {
        let env = Environment::Instrumented;
        assert!(env.accepts("foo-coverage.ec"));
        assert!(env.accepts("coverage.ec"));
        assert!(!env.accepts("readme.txt"));
        assert!(!env.accepts("coverage.ec.tmp"));
    }

    #[test]
    fn test_unit_accepts_everything() {
        assert!(Environment::Unit.accepts("testDebugUnitTest.exec"));
        assert!(Environment::Unit.accepts("anything"));
    }

    #[test]
    fn test_parse_roundtrip() {
        for env in Environment::ALL {
            assert_eq!(env.as_str().parse::<Environment>().unwrap(), env);
        }
        assert!("device".parse::<Environment>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&Environment::Instrumented).unwrap();
        assert_eq!(json, "\"instrumented\"");
    }
}
