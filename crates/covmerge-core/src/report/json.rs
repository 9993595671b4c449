use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{write_file, ReportLayout, ReportMeta, ReportRenderer};
use crate::domain::Result;
use crate::exec::SessionInfo;
use crate::model::{ClassStatus, Counter, CoverageModel, PackageCoverage, TraceWarning};

pub const SUMMARY_SCHEMA_VERSION: &str = "1.0";

/// Overall counters in summary.json.
///
/// `class_percent` covers every filtered class and is the value to gate on.
/// The probe figures only cover classes with matching execution data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TotalsSummary {
    pub classes: Counter,
    pub class_percent: f64,
    pub executed_probes: Counter,
    pub executed_probe_percent: f64,
}

/// Single class entry in summary.json.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassSummary {
    pub name: String,
    pub path: String,
    pub status: ClassStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub probes: Option<Counter>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<PathBuf>,
}

/// Canonical coverage summary written for CI gates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageSummary {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub report_name: String,
    pub totals: TotalsSummary,
    pub sessions: Vec<SessionInfo>,
    pub skipped_traces: Vec<TraceWarning>,
    pub packages: Vec<PackageCoverage>,
    pub classes: Vec<ClassSummary>,
}

impl CoverageSummary {
    pub fn from_model(model: &CoverageModel, meta: &ReportMeta) -> Self {
        let classes = model.class_counter();
        let probes = model.executed_probe_counter();
        Self {
            schema_version: SUMMARY_SCHEMA_VERSION.to_string(),
            generated_at: meta.generated_at,
            report_name: meta.name.clone(),
            totals: TotalsSummary {
                classes,
                class_percent: classes.percent(),
                executed_probes: probes,
                executed_probe_percent: probes.percent(),
            },
            sessions: model.sessions().cloned().collect(),
            skipped_traces: model.warnings().cloned().collect(),
            packages: model.packages(),
            classes: model
                .classes()
                .map(|c| ClassSummary {
                    name: c.name().to_string(),
                    path: c.class.path.clone(),
                    status: c.status,
                    probes: c.probe_counter(),
                    source: c.source.clone(),
                })
                .collect(),
        }
    }
}

/// Renders `json/summary.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSummary;

impl ReportRenderer for JsonSummary {
    fn name(&self) -> &'static str {
        "json"
    }

    fn render(
        &self,
        model: &CoverageModel,
        meta: &ReportMeta,
        layout: &ReportLayout,
    ) -> Result<Vec<PathBuf>> {
        let summary = CoverageSummary::from_model(model, meta);
        let content = serde_json::to_string_pretty(&summary)?;
        write_file(&layout.json_file, &content)?;
        Ok(vec![layout.json_file.clone()])
    }
}
