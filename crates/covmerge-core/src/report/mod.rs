//! Report rendering.
//!
//! A [`CoverageModel`] is rendered to a fixed layout under the coverage
//! output root: a browsable HTML tree, a structured XML report, a JSON
//! summary for CI gates and the merged trace for external analyzers. Every
//! output is overwritten on each run.

pub mod html;
pub mod json;
pub mod xml;

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::domain::{CovError, Result};
use crate::exec::write_exec_file;
use crate::model::CoverageModel;

pub use html::HtmlReport;
pub use json::{ClassSummary, CoverageSummary, JsonSummary, TotalsSummary, SUMMARY_SCHEMA_VERSION};
pub use xml::XmlReport;

/// Output locations of every rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLayout {
    pub html_dir: PathBuf,
    pub xml_file: PathBuf,
    pub json_file: PathBuf,
    pub merged_exec_file: PathBuf,
}

impl ReportLayout {
    /// Standard layout below a coverage output root.
    pub fn under(output_root: &Path) -> Self {
        Self {
            html_dir: output_root.join("html"),
            xml_file: output_root.join("xml").join("report.xml"),
            json_file: output_root.join("json").join("summary.json"),
            merged_exec_file: output_root.join("merged.exec"),
        }
    }
}

/// Report title and generation time, shared by every rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMeta {
    pub name: String,
    pub generated_at: DateTime<Utc>,
}

impl ReportMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generated_at: Utc::now(),
        }
    }
}

/// One rendering of the coverage model.
pub trait ReportRenderer {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Write the rendering and return the files produced.
    fn render(
        &self,
        model: &CoverageModel,
        meta: &ReportMeta,
        layout: &ReportLayout,
    ) -> Result<Vec<PathBuf>>;
}

/// The renderers run by [`write_reports`], in order.
pub fn default_renderers() -> Vec<Box<dyn ReportRenderer>> {
    vec![
        Box::new(HtmlReport),
        Box::new(XmlReport),
        Box::new(JsonSummary),
    ]
}

/// Write every rendering plus the merged trace.
///
/// The HTML directory is cleared first so pages of classes that no longer
/// exist do not linger.
pub fn write_reports(
    model: &CoverageModel,
    meta: &ReportMeta,
    layout: &ReportLayout,
) -> Result<Vec<PathBuf>> {
    if layout.html_dir.exists() {
        std::fs::remove_dir_all(&layout.html_dir).map_err(|source| CovError::ReportWrite {
            path: layout.html_dir.clone(),
            source,
        })?;
    }

    let mut written = Vec::new();
    for renderer in default_renderers() {
        let files = renderer.render(model, meta, layout)?;
        tracing::debug!(renderer = renderer.name(), files = files.len(), "rendered report");
        written.extend(files);
    }

    write_exec_file(model.store(), &layout.merged_exec_file).map_err(|source| {
        CovError::ReportWrite {
            path: layout.merged_exec_file.clone(),
            source,
        }
    })?;
    written.push(layout.merged_exec_file.clone());

    tracing::info!(
        files = written.len(),
        html = %layout.html_dir.display(),
        xml = %layout.xml_file.display(),
        "reports written"
    );
    Ok(written)
}

/// Write `contents` to `path`, creating parent directories.
pub(crate) fn write_file(path: &Path, contents: &str) -> Result<()> {
    let report_err = |source| CovError::ReportWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(report_err)?;
    }
    std::fs::write(path, contents).map_err(report_err)
}

/// Escape text for use in HTML/XML content and attribute values.
pub(crate) fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
