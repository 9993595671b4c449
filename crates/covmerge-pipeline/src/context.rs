//! Resolved paths for one pipeline run.

use covmerge_core::{Environment, ReportLayout, SourceDirectorySet};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::PipelineConfig;

/// Staging root below the build directory.
pub const STAGING_ROOT: &str = "coverage_input";

/// Report root below the build directory.
pub const OUTPUT_ROOT: &str = "coverage_output";

/// Every path a run touches, resolved once from the configuration.
///
/// Steps receive the context explicitly and never consult the working
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    pub run_id: String,
    pub project_dir: PathBuf,
    pub build_dir: PathBuf,
    pub class_root: PathBuf,
    pub unit_producer: PathBuf,
    pub instrumented_producer: PathBuf,
    pub unit_staging: PathBuf,
    pub instrumented_staging: PathBuf,
    pub output_root: PathBuf,
    #[serde(skip)]
    pub sources: SourceDirectorySet,
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl RunContext {
    /// Resolve every path for a fresh run with a new run id.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let project_dir = config.project_dir.clone();
        let build_dir = resolve(&project_dir, &config.build_dir);
        let staging = build_dir.join(STAGING_ROOT);
        let paths = &config.paths;

        let sources = SourceDirectorySet::new(
            paths
                .source_roots
                .iter()
                .map(|p| resolve(&project_dir, p))
                .chain(
                    paths
                        .generated_source_roots
                        .iter()
                        .map(|p| resolve(&build_dir, p)),
                ),
        );

        Self {
            run_id: Uuid::new_v4().to_string(),
            class_root: resolve(&build_dir, &paths.class_root),
            unit_producer: resolve(&build_dir, &paths.unit_producer),
            instrumented_producer: resolve(&build_dir, &paths.instrumented_producer),
            unit_staging: staging.join(Environment::Unit.staging_dir_name()),
            instrumented_staging: staging.join(Environment::Instrumented.staging_dir_name()),
            output_root: build_dir.join(OUTPUT_ROOT),
            project_dir,
            build_dir,
            sources,
        }
    }

    pub fn producer(&self, environment: Environment) -> &Path {
        match environment {
            Environment::Unit => &self.unit_producer,
            Environment::Instrumented => &self.instrumented_producer,
        }
    }

    pub fn staging_dir(&self, environment: Environment) -> &Path {
        match environment {
            Environment::Unit => &self.unit_staging,
            Environment::Instrumented => &self.instrumented_staging,
        }
    }

    pub fn report_layout(&self) -> ReportLayout {
        ReportLayout::under(&self.output_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = PipelineConfig {
            project_dir: PathBuf::from("/work/lib"),
            ..PipelineConfig::default()
        };
        let ctx = RunContext::from_config(&config);

        assert_eq!(ctx.build_dir, Path::new("/work/lib/build"));
        assert_eq!(
            ctx.staging_dir(Environment::Unit),
            Path::new("/work/lib/build/coverage_input/unit_tests")
        );
        assert_eq!(
            ctx.staging_dir(Environment::Instrumented),
            Path::new("/work/lib/build/coverage_input/android_tests")
        );
        assert_eq!(
            ctx.producer(Environment::Unit),
            Path::new(
                "/work/lib/build/outputs/unit_test_code_coverage/debugUnitTest/testDebugUnitTest.exec"
            )
        );
        assert_eq!(
            ctx.class_root,
            Path::new("/work/lib/build/intermediates/javac/debug")
        );
        assert_eq!(
            ctx.report_layout().xml_file,
            Path::new("/work/lib/build/coverage_output/xml/report.xml")
        );
        assert_eq!(
            ctx.sources.roots(),
            &[
                PathBuf::from("/work/lib/src/main/java"),
                PathBuf::from("/work/lib/build/generated/source/buildConfig/debug"),
                PathBuf::from("/work/lib/build/generated/source/r/debug"),
            ]
        );
    }

    #[test]
    fn test_absolute_build_dir_override() {
        let config = PipelineConfig::default().with_build_dir("/out");
        let ctx = RunContext::from_config(&config);
        assert_eq!(ctx.output_root, Path::new("/out/coverage_output"));
    }

    #[test]
    fn test_run_ids_are_unique() {
        let config = PipelineConfig::default();
        assert_ne!(
            RunContext::from_config(&config).run_id,
            RunContext::from_config(&config).run_id
        );
    }
}
