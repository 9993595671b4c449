//! Trace artifacts produced by the test runners.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::environment::Environment;

/// Producer id used for artifacts found in a staging directory that were not
/// staged by the current run.
pub const EXTERNAL_PRODUCER: &str = "external";

/// A file recording which probes executed during one test run.
///
/// Immutable once produced; the merge only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraceArtifact {
    /// Environment the trace was captured in.
    pub environment: Environment,
    /// Location of the trace file.
    pub path: PathBuf,
    /// Identifier of the run that produced or staged the file.
    pub producer_run_id: String,
}

impl TraceArtifact {
    pub fn new(
        environment: Environment,
        path: impl Into<PathBuf>,
        producer_run_id: impl Into<String>,
    ) -> Self {
        Self {
            environment,
            path: path.into(),
            producer_run_id: producer_run_id.into(),
        }
    }

    /// File name of the trace, lossily converted.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// List the trace artifacts currently present in a staging directory.
///
/// A missing directory yields an empty list: an environment that did not run
/// this cycle contributes no traces. Results are sorted by path.
pub fn list_staged(
    environment: Environment,
    staging_dir: &Path,
    producer_run_id: &str,
) -> std::io::Result<Vec<TraceArtifact>> {
    let read_dir = match std::fs::read_dir(staging_dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut artifacts = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        // In-flight copies from an interrupted staging run.
        if name.starts_with('.') || !environment.accepts(&name) {
            continue;
        }
        artifacts.push(TraceArtifact::new(
            environment,
            entry.path(),
            producer_run_id,
        ));
    }
    artifacts.sort();
    Ok(artifacts)
}
