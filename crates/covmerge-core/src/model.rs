//! Merged coverage model.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;
use std::path::PathBuf;

use crate::classes::{ClassSet, CompiledClass};
use crate::domain::Environment;
use crate::exec::{ExecutionStore, SessionInfo};
use crate::sources::SourceDirectorySet;

/// Covered / missed item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub missed: u64,
    pub covered: u64,
}

impl Counter {
    pub fn new(missed: u64, covered: u64) -> Self {
        Self { missed, covered }
    }

    pub fn total(&self) -> u64 {
        self.missed + self.covered
    }

    /// Covered fraction in `[0, 1]`; zero when there is nothing to cover.
    pub fn ratio(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.covered as f64 / self.total() as f64
    }

    pub fn percent(&self) -> f64 {
        self.ratio() * 100.0
    }
}

impl AddAssign for Counter {
    fn add_assign(&mut self, rhs: Self) {
        self.missed += rhs.missed;
        self.covered += rhs.covered;
    }
}

/// How a class relates to the merged execution data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassStatus {
    /// Execution data matched the class id.
    Executed,
    /// No execution data for this class.
    NotExecuted,
    /// Data exists under the class name but for different class bytes.
    Stale,
}

impl ClassStatus {
    /// Stable machine-readable key, as serialized.
    pub fn key(&self) -> &'static str {
        match self {
            ClassStatus::Executed => "executed",
            ClassStatus::NotExecuted => "not_executed",
            ClassStatus::Stale => "stale",
        }
    }

    /// Human-readable label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassStatus::Executed => "executed",
            ClassStatus::NotExecuted => "not executed",
            ClassStatus::Stale => "stale execution data",
        }
    }
}

/// Coverage of one class of the filtered class set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassCoverage {
    pub class: CompiledClass,
    pub status: ClassStatus,
    /// Merged probe flags when execution data matched.
    pub probes: Option<Vec<bool>>,
    /// Source file defining the class, when found in a source root.
    pub source: Option<PathBuf>,
}

impl ClassCoverage {
    fn analyze(store: &ExecutionStore, class: &CompiledClass, source: Option<PathBuf>) -> Self {
        let name = class.vm_name();
        let (status, probes) = match store.get(class.id, name) {
            Some(data) => (ClassStatus::Executed, Some(data.probes.clone())),
            None if store.entries_named(name).next().is_some() => (ClassStatus::Stale, None),
            None => (ClassStatus::NotExecuted, None),
        };
        Self {
            class: class.clone(),
            status,
            probes,
            source,
        }
    }

    pub fn name(&self) -> &str {
        self.class.vm_name()
    }

    pub fn package(&self) -> &str {
        self.class.package()
    }

    /// Probe counts of the class; `None` when no execution data matched,
    /// since the probe count of a class that never ran is unknown.
    pub fn probe_counter(&self) -> Option<Counter> {
        self.probes.as_ref().map(|probes| {
            let covered = probes.iter().filter(|p| **p).count() as u64;
            Counter::new(probes.len() as u64 - covered, covered)
        })
    }

    /// A class counts as covered once any of its probes executed.
    pub fn class_counter(&self) -> Counter {
        let hit = self
            .probes
            .as_ref()
            .is_some_and(|probes| probes.iter().any(|p| *p));
        if hit {
            Counter::new(0, 1)
        } else {
            Counter::new(1, 0)
        }
    }

    /// Covered fraction of the class's probes; zero when never executed.
    pub fn ratio(&self) -> f64 {
        self.probe_counter().map(|c| c.ratio()).unwrap_or(0.0)
    }
}

/// A trace artifact that was skipped because it could not be read.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraceWarning {
    pub environment: Environment,
    pub path: PathBuf,
    pub reason: String,
}

/// Aggregated coverage of one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCoverage {
    /// VM package name (`com/example`); empty for the default package.
    pub name: String,
    pub classes: Counter,
    /// Probes of the package's executed classes only.
    pub executed_probes: Counter,
}

impl PackageCoverage {
    /// Dotted name for display.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            "(default package)".to_string()
        } else {
            self.name.replace('/', ".")
        }
    }
}

/// Combined coverage of every filtered class across all readable traces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageModel {
    classes: BTreeMap<String, ClassCoverage>,
    store: ExecutionStore,
    warnings: BTreeSet<TraceWarning>,
}

impl CoverageModel {
    /// Attribute merged execution data to every class of `classes`.
    ///
    /// Classes without matching data are kept as uncovered.
    pub fn build(
        store: ExecutionStore,
        classes: &ClassSet,
        sources: &SourceDirectorySet,
        warnings: impl IntoIterator<Item = TraceWarning>,
    ) -> Self {
        let classes = classes
            .iter()
            .map(|class| {
                let source = sources.locate(class.vm_name());
                (
                    class.path.clone(),
                    ClassCoverage::analyze(&store, class, source),
                )
            })
            .collect();

        Self {
            classes,
            store,
            warnings: warnings.into_iter().collect(),
        }
    }

    /// Union of two models.
    ///
    /// Execution data is merged probe-wise and every class is re-attributed
    /// against the merged data, so combining the models of two disjoint sets
    /// of traces equals the model of their union.
    pub fn combine(&self, other: &CoverageModel) -> CoverageModel {
        let mut store = self.store.clone();
        store.merge(&other.store);

        let mut classes = BTreeMap::new();
        for (path, coverage) in self.classes.iter().chain(other.classes.iter()) {
            if classes.contains_key(path) {
                continue;
            }
            let source = coverage
                .source
                .clone()
                .or_else(|| other.classes.get(path).and_then(|c| c.source.clone()));
            classes.insert(
                path.clone(),
                ClassCoverage::analyze(&store, &coverage.class, source),
            );
        }

        CoverageModel {
            classes,
            store,
            warnings: self.warnings.union(&other.warnings).cloned().collect(),
        }
    }

    /// Per-class coverage in path order.
    pub fn classes(&self) -> impl Iterator<Item = &ClassCoverage> {
        self.classes.values()
    }

    pub fn class(&self, path: &str) -> Option<&ClassCoverage> {
        self.classes.get(path)
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Merged execution data, including classes outside the filtered set.
    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionInfo> {
        self.store.sessions()
    }

    /// Skipped trace artifacts.
    pub fn warnings(&self) -> impl Iterator<Item = &TraceWarning> {
        self.warnings.iter()
    }

    pub fn skipped_count(&self) -> usize {
        self.warnings.len()
    }

    /// Probes summed over the classes with matching execution data.
    ///
    /// Classes that never ran contribute nothing here, so this ratio
    /// overstates coverage whenever some classes were not executed. Gate on
    /// [`CoverageModel::class_counter`], which counts every filtered class.
    pub fn executed_probe_counter(&self) -> Counter {
        let mut total = Counter::default();
        for counter in self.classes.values().filter_map(|c| c.probe_counter()) {
            total += counter;
        }
        total
    }

    /// Every filtered class; one not executed counts as missed.
    pub fn class_counter(&self) -> Counter {
        let mut total = Counter::default();
        for class in self.classes.values() {
            total += class.class_counter();
        }
        total
    }

    /// Per-package aggregation in package order.
    pub fn packages(&self) -> Vec<PackageCoverage> {
        let mut packages: BTreeMap<&str, PackageCoverage> = BTreeMap::new();
        for class in self.classes.values() {
            let entry = packages
                .entry(class.package())
                .or_insert_with(|| PackageCoverage {
                    name: class.package().to_string(),
                    classes: Counter::default(),
                    executed_probes: Counter::default(),
                });
            entry.classes += class.class_counter();
            if let Some(probes) = class.probe_counter() {
                entry.executed_probes += probes;
            }
        }
        packages.into_values().collect()
    }

    /// Classes of one package in path order.
    pub fn classes_in<'a>(&'a self, package: &'a str) -> impl Iterator<Item = &'a ClassCoverage> {
        self.classes.values().filter(move |c| c.package() == package)
    }
}
