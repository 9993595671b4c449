//! Structured XML report.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8" standalone="yes"?>
//! <report name="app">
//!   <sessioninfo id="device-1" start="1700000000000" dump="1700000005000"/>
//!   <package name="com/example">
//!     <class name="com/example/Foo" sourcefilename="Foo.java" status="executed">
//!       <counter type="PROBE" missed="1" covered="3"/>
//!       <counter type="CLASS" missed="0" covered="1"/>
//!     </class>
//!     <class name="com/example/Bar" status="not_executed">
//!       <counter type="CLASS" missed="1" covered="0"/>
//!     </class>
//!     <counter type="EXECUTED_PROBE" missed="1" covered="3"/>
//!     <counter type="CLASS" missed="1" covered="1"/>
//!   </package>
//!   <counter type="EXECUTED_PROBE" missed="1" covered="3"/>
//!   <counter type="CLASS" missed="1" covered="1"/>
//!   <skipped environment="instrumented" path="..." reason="..."/>
//! </report>
//! ```
//!
//! Classes without execution data carry no `PROBE` counter. Package and
//! report totals sum probes of executed classes only, hence `EXECUTED_PROBE`.

use std::fmt::Write;
use std::path::PathBuf;

use super::{escape, write_file, ReportLayout, ReportMeta, ReportRenderer};
use crate::domain::Result;
use crate::model::{Counter, CoverageModel};

/// Renders `xml/report.xml`.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlReport;

impl ReportRenderer for XmlReport {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn render(
        &self,
        model: &CoverageModel,
        meta: &ReportMeta,
        layout: &ReportLayout,
    ) -> Result<Vec<PathBuf>> {
        write_file(&layout.xml_file, &render_xml(model, meta))?;
        Ok(vec![layout.xml_file.clone()])
    }
}

fn write_counter(xml: &mut String, indent: &str, kind: &str, counter: Counter) {
    let _ = writeln!(
        xml,
        r#"{}<counter type="{}" missed="{}" covered="{}"/>"#,
        indent, kind, counter.missed, counter.covered
    );
}

fn write_totals(xml: &mut String, indent: &str, executed_probes: Counter, classes: Counter) {
    write_counter(xml, indent, "EXECUTED_PROBE", executed_probes);
    write_counter(xml, indent, "CLASS", classes);
}

/// Render the model as an XML document.
pub fn render_xml(model: &CoverageModel, meta: &ReportMeta) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    xml.push('\n');
    let _ = writeln!(xml, r#"<report name="{}">"#, escape(&meta.name));

    for session in model.sessions() {
        let _ = writeln!(
            xml,
            r#"  <sessioninfo id="{}" start="{}" dump="{}"/>"#,
            escape(&session.id),
            session.start,
            session.dump
        );
    }

    for package in model.packages() {
        let _ = writeln!(xml, r#"  <package name="{}">"#, escape(&package.name));
        for class in model.classes_in(&package.name) {
            let _ = write!(xml, r#"    <class name="{}""#, escape(class.name()));
            if let Some(file_name) = class.source.as_ref().and_then(|s| s.file_name()) {
                let _ = write!(
                    xml,
                    r#" sourcefilename="{}""#,
                    escape(&file_name.to_string_lossy())
                );
            }
            let _ = writeln!(xml, r#" status="{}">"#, class.status.key());
            if let Some(probes) = class.probe_counter() {
                write_counter(&mut xml, "      ", "PROBE", probes);
            }
            write_counter(&mut xml, "      ", "CLASS", class.class_counter());
            xml.push_str("    </class>\n");
        }
        write_totals(&mut xml, "    ", package.executed_probes, package.classes);
        xml.push_str("  </package>\n");
    }

    write_totals(
        &mut xml,
        "  ",
        model.executed_probe_counter(),
        model.class_counter(),
    );

    for warning in model.warnings() {
        let _ = writeln!(
            xml,
            r#"  <skipped environment="{}" path="{}" reason="{}"/>"#,
            warning.environment,
            escape(&warning.path.to_string_lossy()),
            escape(&warning.reason)
        );
    }

    xml.push_str("</report>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{ClassSet, CompiledClass};
    use crate::domain::Environment;
    use crate::exec::{ExecutionData, ExecutionStore, SessionInfo};
    use crate::model::TraceWarning;
    use crate::sources::SourceDirectorySet;

    fn meta() -> ReportMeta {
        ReportMeta::new("camera & co")
    }

    #[test]
    fn test_empty_model_is_well_formed() {
        let classes: ClassSet = [CompiledClass::new("a/Main.class", 1)].into_iter().collect();
        let model = CoverageModel::build(
            ExecutionStore::new(),
            &classes,
            &SourceDirectorySet::default(),
            Vec::new(),
        );
        let xml = render_xml(&model, &meta());

        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"<report name="camera &amp; co">"#));
        assert!(xml.contains(r#"<class name="a/Main" status="not_executed">"#));
        assert!(xml.contains(r#"<counter type="CLASS" missed="1" covered="0"/>"#));
        assert!(!xml.contains(r#"type="PROBE""#));
        assert!(xml.contains(r#"<counter type="EXECUTED_PROBE" missed="0" covered="0"/>"#));
        assert!(xml.trim_end().ends_with("</report>"));
        assert_eq!(xml.matches("<package ").count(), xml.matches("</package>").count());
        assert_eq!(xml.matches("<class ").count(), xml.matches("</class>").count());
    }

    #[test]
    fn test_sessions_counters_and_skipped() {
        let mut store = ExecutionStore::new();
        store.add_session(SessionInfo {
            id: "emulator-5554".to_string(),
            start: 10,
            dump: 20,
        });
        store.put(ExecutionData::new(1, "a/Main", vec![true, true, false]));
        let classes: ClassSet = [CompiledClass::new("a/Main.class", 1)].into_iter().collect();
        let warning = TraceWarning {
            environment: Environment::Instrumented,
            path: "staging/bad-coverage.ec".into(),
            reason: "bad magic <0xbeef>".to_string(),
        };
        let model =
            CoverageModel::build(store, &classes, &SourceDirectorySet::default(), vec![warning]);

        let xml = render_xml(&model, &meta());
        assert!(xml.contains(r#"<sessioninfo id="emulator-5554" start="10" dump="20"/>"#));
        assert!(xml.contains(r#"<counter type="PROBE" missed="1" covered="2"/>"#));
        assert!(xml.contains(
            r#"<skipped environment="instrumented" path="staging/bad-coverage.ec" reason="bad magic &lt;0xbeef&gt;"/>"#
        ));
        let sessions_at = xml.find("<sessioninfo").unwrap();
        let package_at = xml.find("<package").unwrap();
        let skipped_at = xml.find("<skipped").unwrap();
        assert!(sessions_at < package_at && package_at < skipped_at);
    }
}
