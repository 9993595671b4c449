//! Trace merging.
//!
//! Every readable trace is decoded and folded into a single
//! [`ExecutionStore`]. Probe flags combine with logical OR, so the order of
//! the traces never affects the result.

use serde::{Deserialize, Serialize};

use crate::classes::ClassSet;
use crate::domain::{CovError, Result, TraceArtifact};
use crate::exec::{read_exec_file, ExecutionStore};
use crate::model::{CoverageModel, TraceWarning};
use crate::sources::SourceDirectorySet;

/// What to do with a trace artifact that cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreadablePolicy {
    /// Record a warning and continue with the remaining traces.
    #[default]
    SkipWithWarning,
    /// Abort the merge with [`CovError::UnreadableTrace`].
    Fail,
}

/// Decode and fold `traces` into one store.
///
/// Unreadable traces are handled per `policy`; skipped ones are returned as
/// warnings in input order.
pub fn merge_traces(
    traces: &[TraceArtifact],
    policy: UnreadablePolicy,
) -> Result<(ExecutionStore, Vec<TraceWarning>)> {
    let mut store = ExecutionStore::new();
    let mut warnings = Vec::new();

    for trace in traces {
        match read_exec_file(&trace.path) {
            Ok(data) => {
                tracing::debug!(
                    path = %trace.path.display(),
                    environment = %trace.environment,
                    classes = data.len(),
                    sessions = data.session_count(),
                    "merged trace"
                );
                store.merge(&data);
            }
            Err(source) => match policy {
                UnreadablePolicy::Fail => {
                    return Err(CovError::UnreadableTrace {
                        path: trace.path.clone(),
                        source,
                    });
                }
                UnreadablePolicy::SkipWithWarning => {
                    tracing::warn!(
                        path = %trace.path.display(),
                        environment = %trace.environment,
                        error = %source,
                        "skipping unreadable trace"
                    );
                    warnings.push(TraceWarning {
                        environment: trace.environment,
                        path: trace.path.clone(),
                        reason: source.to_string(),
                    });
                }
            },
        }
    }

    Ok((store, warnings))
}

/// Merge every trace and attribute the result to the filtered classes.
///
/// With no readable traces the model still lists every class, all uncovered.
pub fn merge(
    traces: &[TraceArtifact],
    classes: &ClassSet,
    sources: &SourceDirectorySet,
    policy: UnreadablePolicy,
) -> Result<CoverageModel> {
    let (store, warnings) = merge_traces(traces, policy)?;
    let model = CoverageModel::build(store, classes, sources, warnings);

    tracing::info!(
        traces = traces.len(),
        skipped = model.skipped_count(),
        classes = model.class_count(),
        covered = model.class_counter().covered,
        "merged coverage"
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::CompiledClass;
    use crate::domain::{Environment, TraceError};
    use crate::exec::{write_exec_file, ExecutionData, SessionInfo};
    use crate::model::ClassStatus;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_trace(path: &Path, session: &str, entries: &[(u64, &str, Vec<bool>)]) {
        let mut store = ExecutionStore::new();
        store.add_session(SessionInfo {
            id: session.to_string(),
            start: 1,
            dump: 2,
        });
        for (id, name, probes) in entries {
            store.put(ExecutionData::new(*id, *name, probes.clone()));
        }
        write_exec_file(&store, path).unwrap();
    }

    fn classes() -> ClassSet {
        [
            CompiledClass::new("com/x/Foo.class", 7),
            CompiledClass::new("com/x/Bar.class", 8),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_merge_unit_and_instrumented() {
        let dir = tempdir().unwrap();
        let unit = dir.path().join("unit.exec");
        let device = dir.path().join("device-coverage.ec");
        write_trace(&unit, "unit", &[(7, "com/x/Foo", vec![true, false, false])]);
        write_trace(&device, "device", &[(7, "com/x/Foo", vec![false, false, true])]);

        let traces = vec![
            TraceArtifact::new(Environment::Unit, &unit, "run"),
            TraceArtifact::new(Environment::Instrumented, &device, "run"),
        ];
        let model = merge(
            &traces,
            &classes(),
            &SourceDirectorySet::default(),
            UnreadablePolicy::default(),
        )
        .unwrap();

        let foo = model.class("com/x/Foo.class").unwrap();
        assert_eq!(foo.probes.as_deref(), Some(&[true, false, true][..]));
        assert_eq!(
            model.class("com/x/Bar.class").unwrap().status,
            ClassStatus::NotExecuted
        );
        assert_eq!(model.sessions().count(), 2);
        assert_eq!(model.skipped_count(), 0);
    }

    #[test]
    fn test_no_traces_gives_zero_coverage() {
        let model = merge(
            &[],
            &classes(),
            &SourceDirectorySet::default(),
            UnreadablePolicy::default(),
        )
        .unwrap();
        assert_eq!(model.class_count(), 2);
        assert_eq!(model.class_counter().ratio(), 0.0);
    }

    #[test]
    fn test_corrupt_trace_is_skipped_with_warning() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good-coverage.ec");
        let bad = dir.path().join("bad-coverage.ec");
        write_trace(&good, "good", &[(8, "com/x/Bar", vec![true])]);
        std::fs::write(&bad, b"not a trace").unwrap();

        let traces = vec![
            TraceArtifact::new(Environment::Instrumented, &bad, "run"),
            TraceArtifact::new(Environment::Instrumented, &good, "run"),
        ];
        let (store, warnings) = merge_traces(&traces, UnreadablePolicy::SkipWithWarning).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].path, bad);
        assert_eq!(warnings[0].environment, Environment::Instrumented);
    }

    #[test]
    fn test_corrupt_trace_fails_under_strict_policy() {
        let dir = tempdir().unwrap();
        let bad = dir.path().join("bad-coverage.ec");
        std::fs::write(&bad, [0x01, 0xC0]).unwrap();

        let traces = vec![TraceArtifact::new(Environment::Instrumented, &bad, "run")];
        let err = merge_traces(&traces, UnreadablePolicy::Fail).unwrap_err();
        match err {
            CovError::UnreadableTrace { path, source } => {
                assert_eq!(path, bad);
                assert!(matches!(source, TraceError::Truncated));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_trace_file_is_unreadable() {
        let dir = tempdir().unwrap();
        let traces = vec![TraceArtifact::new(
            Environment::Unit,
            dir.path().join("gone.exec"),
            "run",
        )];
        let (_, warnings) = merge_traces(&traces, UnreadablePolicy::SkipWithWarning).unwrap();
        assert_eq!(warnings.len(), 1);
    }
}
