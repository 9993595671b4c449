//! Artifact collection.
//!
//! Copies a test runner's raw trace output into the pipeline-owned staging
//! directory of its environment. Staging is all-or-nothing per invocation:
//! files are copied under dot-prefixed temporary names and renamed into place
//! only after every copy succeeded. Files they replace are set aside first
//! and put back if any rename fails.

use covmerge_core::obs::emit_artifact_staged;
use covmerge_core::{Environment, TraceArtifact};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{PipelineError, Result};

/// One artifact copied into a staging directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedArtifact {
    pub artifact: TraceArtifact,
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the content.
    pub sha256: String,
}

/// Outcome of staging one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingResult {
    pub environment: Environment,
    pub staging_dir: PathBuf,
    pub artifacts: Vec<StagedArtifact>,
    /// Producer files that did not match the environment's artifact pattern.
    pub ignored: usize,
}

impl StagingResult {
    pub fn traces(&self) -> impl Iterator<Item = &TraceArtifact> {
        self.artifacts.iter().map(|a| &a.artifact)
    }

    pub fn total_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size).sum()
    }
}

/// Writer that hashes everything passing through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn step_name(environment: Environment) -> String {
    format!("{}_traces_staged", environment.as_str())
}

/// Producer files to consider, in name order.
///
/// A file producer is its own single candidate; a directory contributes its
/// top-level regular files.
fn candidates(step: &str, producer: &Path) -> Result<Vec<PathBuf>> {
    let missing = |reason: String| PipelineError::MissingArtifact {
        step: step.to_string(),
        path: producer.to_path_buf(),
        reason,
    };

    let meta = match std::fs::metadata(producer) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(missing(
                "producer output does not exist; did the test runner fail?".to_string(),
            ));
        }
        Err(e) => {
            return Err(PipelineError::CopyFailed {
                step: step.to_string(),
                path: producer.to_path_buf(),
                source: e,
            })
        }
    };

    if meta.is_file() {
        return Ok(vec![producer.to_path_buf()]);
    }
    if !meta.is_dir() {
        return Err(missing("producer output is neither a file nor a directory".to_string()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(producer)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| PipelineError::CopyFailed {
            step: step.to_string(),
            path: producer.to_path_buf(),
            source: e.into(),
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn copy_hashed(src: &Path, dest: &Path) -> io::Result<(u64, String)> {
    let mut reader = File::open(src)?;
    let mut writer = HashingWriter {
        inner: io::BufWriter::new(File::create(dest)?),
        hasher: Sha256::new(),
    };
    let size = io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    Ok((size, hex::encode(writer.hasher.finalize())))
}

fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "cannot remove temporary file");
            }
        }
    }
}

/// A producer file copied under its temporary name.
struct Copied {
    temp: PathBuf,
    dest: PathBuf,
    size: u64,
    sha256: String,
}

/// Move an existing regular file at `dest` to a dot-prefixed backup name.
fn set_aside(dest: &Path, run_id: &str) -> io::Result<Option<PathBuf>> {
    match std::fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_file() => {
            let name = dest
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let backup = dest.with_file_name(format!(".{}.{}.bak", name, run_id));
            std::fs::rename(dest, &backup)?;
            Ok(Some(backup))
        }
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn restore(backup: &Path, dest: &Path) {
    if let Err(e) = std::fs::rename(backup, dest) {
        tracing::warn!(
            backup = %backup.display(),
            path = %dest.display(),
            error = %e,
            "cannot restore staged file"
        );
    }
}

/// Rename every temporary file into place.
///
/// On failure the files already placed are removed and the files they
/// replaced restored, so the staging directory is left as it was.
fn commit(copied: &[Copied], run_id: &str) -> std::result::Result<(), (PathBuf, io::Error)> {
    let mut placed: Vec<(&Path, Option<PathBuf>)> = Vec::with_capacity(copied.len());
    let roll_back = |placed: &[(&Path, Option<PathBuf>)]| {
        for (dest, backup) in placed.iter().rev() {
            remove_all(&[dest.to_path_buf()]);
            if let Some(backup) = backup {
                restore(backup, dest);
            }
        }
    };

    for item in copied {
        let backup = match set_aside(&item.dest, run_id) {
            Ok(backup) => backup,
            Err(e) => {
                roll_back(&placed);
                return Err((item.dest.clone(), e));
            }
        };
        if let Err(e) = std::fs::rename(&item.temp, &item.dest) {
            if let Some(backup) = &backup {
                restore(backup, &item.dest);
            }
            roll_back(&placed);
            return Err((item.dest.clone(), e));
        }
        placed.push((&item.dest, backup));
    }

    let backups: Vec<PathBuf> = placed.into_iter().filter_map(|(_, b)| b).collect();
    remove_all(&backups);
    Ok(())
}

/// Stage the trace artifacts of `environment` from `producer` into
/// `staging_dir`.
///
/// Fails with `MissingArtifact` when the producer path does not exist and
/// with `CopyFailed` on any I/O error. The producer is never modified.
pub fn stage(
    environment: Environment,
    producer: &Path,
    staging_dir: &Path,
    run_id: &str,
) -> Result<StagingResult> {
    let step = step_name(environment);
    let copy_failed = |path: &Path, source: io::Error| PipelineError::CopyFailed {
        step: step.clone(),
        path: path.to_path_buf(),
        source,
    };

    let mut selected = Vec::new();
    let mut ignored = 0usize;
    for path in candidates(&step, producer)? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if environment.accepts(&name) {
            selected.push((path, name));
        } else {
            tracing::debug!(path = %path.display(), %environment, "ignoring non-trace file");
            ignored += 1;
        }
    }

    std::fs::create_dir_all(staging_dir).map_err(|e| copy_failed(staging_dir, e))?;

    // Copy everything under temporary names first.
    let mut temps = Vec::with_capacity(selected.len());
    let mut copied = Vec::with_capacity(selected.len());
    for (src, name) in &selected {
        let temp = staging_dir.join(format!(".{}.{}.tmp", name, run_id));
        temps.push(temp.clone());
        match copy_hashed(src, &temp) {
            Ok((size, sha256)) => copied.push(Copied {
                temp,
                dest: staging_dir.join(name),
                size,
                sha256,
            }),
            Err(e) => {
                remove_all(&temps);
                return Err(copy_failed(src, e));
            }
        }
    }

    if let Err((dest, e)) = commit(&copied, run_id) {
        remove_all(&temps);
        return Err(copy_failed(&dest, e));
    }

    let mut artifacts = Vec::with_capacity(copied.len());
    for item in copied {
        emit_artifact_staged(run_id, environment.as_str(), &item.dest, item.size);
        artifacts.push(StagedArtifact {
            artifact: TraceArtifact::new(environment, item.dest, run_id),
            size: item.size,
            sha256: item.sha256,
        });
    }

    if artifacts.is_empty() {
        tracing::warn!(
            %environment,
            producer = %producer.display(),
            ignored,
            "no trace artifacts found in producer output"
        );
    }

    Ok(StagingResult {
        environment,
        staging_dir: staging_dir.to_path_buf(),
        artifacts,
        ignored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use tempfile::tempdir;

    #[test]
    fn test_instrumented_stages_only_coverage_files() {
        let dir = tempdir().unwrap();
        let producer = dir.path().join("connected");
        std::fs::create_dir_all(producer.join("nested")).unwrap();
        std::fs::write(producer.join("foo-coverage.ec"), b"trace").unwrap();
        std::fs::write(producer.join("readme.txt"), b"hello").unwrap();
        std::fs::write(producer.join("nested/deep-coverage.ec"), b"deep").unwrap();
        let staging = dir.path().join("staging/android_tests");

        let result = stage(Environment::Instrumented, &producer, &staging, "run-1").unwrap();

        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.ignored, 1);
        let staged = &result.artifacts[0];
        assert_eq!(staged.artifact.path, staging.join("foo-coverage.ec"));
        assert_eq!(staged.artifact.producer_run_id, "run-1");
        assert_eq!(staged.size, 5);
        assert_eq!(staged.sha256, hex::encode(Sha256::digest(b"trace")));

        let names: Vec<_> = std::fs::read_dir(&staging)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["foo-coverage.ec"]);
        // Producer untouched
        assert!(producer.join("readme.txt").exists());
        assert!(producer.join("foo-coverage.ec").exists());
    }

    #[test]
    fn test_unit_file_producer() {
        let dir = tempdir().unwrap();
        let producer = dir.path().join("testDebugUnitTest.exec");
        std::fs::write(&producer, b"unit").unwrap();
        let staging = dir.path().join("unit_tests");

        let result = stage(Environment::Unit, &producer, &staging, "r").unwrap();
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(
            std::fs::read(staging.join("testDebugUnitTest.exec")).unwrap(),
            b"unit"
        );
        assert_eq!(result.total_bytes(), 4);
    }

    #[test]
    fn test_missing_producer() {
        let dir = tempdir().unwrap();
        let err = stage(
            Environment::Unit,
            &dir.path().join("missing.exec"),
            &dir.path().join("unit_tests"),
            "r",
        )
        .unwrap_err();
        assert_eq!(err.kind(), FailureKind::MissingArtifact);
        assert!(err.to_string().contains("missing.exec"));
        assert!(!dir.path().join("unit_tests").exists());
    }

    #[test]
    fn test_restaging_replaces_same_name() {
        let dir = tempdir().unwrap();
        let producer = dir.path().join("t.exec");
        let staging = dir.path().join("unit_tests");

        std::fs::write(&producer, b"first").unwrap();
        stage(Environment::Unit, &producer, &staging, "a").unwrap();
        std::fs::write(&producer, b"second").unwrap();
        stage(Environment::Unit, &producer, &staging, "b").unwrap();

        assert_eq!(std::fs::read(staging.join("t.exec")).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_rename_restores_previous_staging() {
        let dir = tempdir().unwrap();
        let producer = dir.path().join("connected");
        std::fs::create_dir_all(&producer).unwrap();
        std::fs::write(producer.join("a-coverage.ec"), b"new a").unwrap();
        std::fs::write(producer.join("b-coverage.ec"), b"new b").unwrap();

        // a is replaced first, then b cannot land on a directory
        let staging = dir.path().join("android_tests");
        std::fs::create_dir_all(staging.join("b-coverage.ec")).unwrap();
        std::fs::write(staging.join("b-coverage.ec/keep"), b"x").unwrap();
        std::fs::write(staging.join("a-coverage.ec"), b"old a").unwrap();

        let err = stage(Environment::Instrumented, &producer, &staging, "r").unwrap_err();

        assert_eq!(err.kind(), FailureKind::CopyFailed);
        assert!(err.to_string().contains("b-coverage.ec"));
        assert_eq!(std::fs::read(staging.join("a-coverage.ec")).unwrap(), b"old a");
        assert!(staging.join("b-coverage.ec").is_dir());
        let mut names: Vec<_> = std::fs::read_dir(&staging)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a-coverage.ec", "b-coverage.ec"]);
    }

    #[test]
    fn test_empty_producer_dir_stages_nothing() {
        let dir = tempdir().unwrap();
        let producer = dir.path().join("connected");
        std::fs::create_dir_all(&producer).unwrap();

        let result = stage(
            Environment::Instrumented,
            &producer,
            &dir.path().join("android_tests"),
            "r",
        )
        .unwrap();
        assert!(result.artifacts.is_empty());
        assert_eq!(result.ignored, 0);
    }
}
