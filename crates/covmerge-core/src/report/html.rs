//! Browsable HTML report.
//!
//! Layout below the HTML root:
//!
//! - `index.html`: totals and one row per package
//! - `<package>/index.html`: one row per class
//! - `<package>/class-<Class>.html`: probe map and source listing with `#L<n>` anchors
//! - `sessions.html`: sessions seen and skipped traces

use std::fmt::Write;
use std::path::{Path, PathBuf};

use super::{escape, write_file, ReportLayout, ReportMeta, ReportRenderer};
use crate::domain::Result;
use crate::model::{ClassCoverage, Counter, CoverageModel, PackageCoverage};

const STYLE: &str = "body{font-family:sans-serif;margin:1.5em}\
table{border-collapse:collapse}\
th,td{padding:2px 8px;text-align:left;border-bottom:1px solid #ddd}\
.bar{display:inline-block;width:120px;height:10px;background:#c33}\
.bar span{display:block;height:10px;background:#3a3}\
.probe{display:inline-block;width:10px;height:10px;margin:1px}\
.hit{background:#3a3}.miss{background:#c33}\
.src td{border:none;padding:0 8px;font-family:monospace;white-space:pre}\
.ln a{color:#999;text-decoration:none}\
.warn{color:#a60}";

/// Renders the `html/` tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlReport;

impl ReportRenderer for HtmlReport {
    fn name(&self) -> &'static str {
        "html"
    }

    fn render(
        &self,
        model: &CoverageModel,
        meta: &ReportMeta,
        layout: &ReportLayout,
    ) -> Result<Vec<PathBuf>> {
        let root = &layout.html_dir;
        let mut written = Vec::new();
        let packages = model.packages();

        let index = root.join("index.html");
        write_file(&index, &render_index(model, meta, &packages))?;
        written.push(index);

        let sessions = root.join("sessions.html");
        write_file(&sessions, &render_sessions(model, meta))?;
        written.push(sessions);

        for package in &packages {
            let dir = root.join(package_dir(&package.name));
            let page = dir.join("index.html");
            write_file(&page, &render_package(model, meta, package))?;
            written.push(page);

            for class in model.classes_in(&package.name) {
                let page = dir.join(class_page(class));
                write_file(&page, &render_class(meta, package, class))?;
                written.push(page);
            }
        }

        Ok(written)
    }
}

/// Directory name of a package's pages.
pub fn package_dir(package: &str) -> String {
    if package.is_empty() {
        "_default".to_string()
    } else {
        package.replace('/', ".")
    }
}

/// File name of a class page, relative to its package directory.
///
/// Prefixed so a class named `index` cannot replace the package page.
pub fn class_page(class: &ClassCoverage) -> String {
    format!("class-{}.html", class.class.simple_name())
}

fn page(title: &str, breadcrumb: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
         <nav>{breadcrumb}</nav>\n<h1>{title}</h1>\n{body}</body>\n</html>\n",
        title = escape(title),
    )
}

fn bar(counter: Counter) -> String {
    format!(
        "<span class=\"bar\"><span style=\"width:{:.0}%\"></span></span> {:.1}%",
        counter.percent(),
        counter.percent()
    )
}

fn probe_cells(counter: Option<Counter>) -> String {
    match counter {
        Some(counter) => counter_cells(counter),
        None => "<td>n/a</td><td>no execution data</td>".to_string(),
    }
}

fn counter_cells(counter: Counter) -> String {
    format!(
        "<td>{}</td><td>{} of {}</td>",
        bar(counter),
        counter.covered,
        counter.total()
    )
}

fn skipped_notice(model: &CoverageModel, href: &str) -> String {
    match model.skipped_count() {
        0 => String::new(),
        n => format!(
            "<p class=\"warn\">{} trace file(s) could not be read and were skipped. \
             See <a href=\"{}\">sessions</a>.</p>\n",
            n, href
        ),
    }
}

fn render_index(model: &CoverageModel, meta: &ReportMeta, packages: &[PackageCoverage]) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "<p>Generated {} &middot; <a href=\"sessions.html\">Sessions</a></p>",
        meta.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    body.push_str(&skipped_notice(model, "sessions.html"));

    body.push_str("<table>\n<tr><th>Package</th><th>Classes</th><th></th><th>Probes (executed classes)</th><th></th></tr>\n");
    for package in packages {
        let _ = writeln!(
            body,
            "<tr><td><a href=\"{}/index.html\">{}</a></td>{}{}</tr>",
            escape(&package_dir(&package.name)),
            escape(&package.display_name()),
            counter_cells(package.classes),
            counter_cells(package.executed_probes)
        );
    }
    let _ = writeln!(
        body,
        "<tr><th>Total</th>{}{}</tr>\n</table>",
        counter_cells(model.class_counter()),
        counter_cells(model.executed_probe_counter())
    );

    page(&meta.name, "", &body)
}

fn render_package(model: &CoverageModel, meta: &ReportMeta, package: &PackageCoverage) -> String {
    let mut body = String::new();
    body.push_str(&skipped_notice(model, "../sessions.html"));
    body.push_str("<table>\n<tr><th>Class</th><th>Status</th><th>Probes</th><th></th></tr>\n");
    for class in model.classes_in(&package.name) {
        let _ = writeln!(
            body,
            "<tr><td><a href=\"{}\">{}</a></td><td>{}</td>{}</tr>",
            escape(&class_page(class)),
            escape(class.class.simple_name()),
            class.status.as_str(),
            probe_cells(class.probe_counter())
        );
    }
    let _ = writeln!(
        body,
        "<tr><th>Total (executed classes)</th><td></td>{}</tr>\n</table>",
        counter_cells(package.executed_probes)
    );

    let crumb = format!("<a href=\"../index.html\">{}</a>", escape(&meta.name));
    page(&package.display_name(), &crumb, &body)
}

fn render_class(meta: &ReportMeta, package: &PackageCoverage, class: &ClassCoverage) -> String {
    let mut body = String::new();
    match class.probe_counter() {
        Some(probes) => {
            let _ = writeln!(
                body,
                "<p>Status: {} &middot; Probes: {} of {} &middot; {}</p>",
                class.status.as_str(),
                probes.covered,
                probes.total(),
                bar(probes)
            );
        }
        None => {
            let _ = writeln!(body, "<p>Status: {}</p>", class.status.as_str());
        }
    }

    if let Some(probes) = &class.probes {
        body.push_str("<h2>Probes</h2>\n<p>");
        for (i, hit) in probes.iter().enumerate() {
            let _ = write!(
                body,
                "<span class=\"probe {}\" title=\"probe {}\"></span>",
                if *hit { "hit" } else { "miss" },
                i
            );
        }
        body.push_str("</p>\n");
    }

    body.push_str("<h2>Source</h2>\n");
    match class.source.as_deref().map(|p| (p, std::fs::read_to_string(p))) {
        Some((path, Ok(text))) => {
            let _ = writeln!(body, "<p>{}</p>", escape(&file_label(path)));
            body.push_str(&source_listing(&text));
        }
        Some((path, Err(e))) => {
            let _ = writeln!(
                body,
                "<p class=\"warn\">Cannot read {}: {}</p>",
                escape(&path.display().to_string()),
                escape(&e.to_string())
            );
        }
        None => body.push_str("<p>Source not available.</p>\n"),
    }

    let crumb = format!(
        "<a href=\"../index.html\">{}</a> &gt; <a href=\"index.html\">{}</a>",
        escape(&meta.name),
        escape(&package.display_name())
    );
    page(class.name(), &crumb, &body)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Numbered source listing; each line is addressable as `#L<n>`.
pub fn source_listing(text: &str) -> String {
    let mut out = String::from("<table class=\"src\">\n");
    for (idx, line) in text.lines().enumerate() {
        let n = idx + 1;
        let _ = writeln!(
            out,
            "<tr id=\"L{n}\"><td class=\"ln\"><a href=\"#L{n}\">{n}</a></td><td>{}</td></tr>",
            escape(line)
        );
    }
    out.push_str("</table>\n");
    out
}

fn render_sessions(model: &CoverageModel, meta: &ReportMeta) -> String {
    let mut body = String::new();

    body.push_str("<h2>Sessions</h2>\n");
    if model.sessions().next().is_none() {
        body.push_str("<p>No execution data was recorded.</p>\n");
    } else {
        body.push_str("<table>\n<tr><th>Session</th><th>Start</th><th>Dump</th></tr>\n");
        for session in model.sessions() {
            let _ = writeln!(
                body,
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&session.id),
                format_millis(session.start),
                format_millis(session.dump)
            );
        }
        body.push_str("</table>\n");
    }

    body.push_str("<h2>Skipped traces</h2>\n");
    if model.skipped_count() == 0 {
        body.push_str("<p>None.</p>\n");
    } else {
        body.push_str("<table>\n<tr><th>Environment</th><th>File</th><th>Reason</th></tr>\n");
        for warning in model.warnings() {
            let _ = writeln!(
                body,
                "<tr class=\"warn\"><td>{}</td><td>{}</td><td>{}</td></tr>",
                warning.environment,
                escape(&warning.path.display().to_string()),
                escape(&warning.reason)
            );
        }
        body.push_str("</table>\n");
    }

    let crumb = format!("<a href=\"index.html\">{}</a>", escape(&meta.name));
    page("Sessions", &crumb, &body)
}

fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{ClassSet, CompiledClass};
    use crate::domain::Environment;
    use crate::exec::{ExecutionData, ExecutionStore, SessionInfo};
    use crate::model::TraceWarning;
    use crate::sources::SourceDirectorySet;
    use tempfile::tempdir;

    #[test]
    fn test_package_dir_names() {
        assert_eq!(package_dir("com/example"), "com.example");
        assert_eq!(package_dir(""), "_default");
    }

    #[test]
    fn test_source_listing_has_line_anchors() {
        let html = source_listing("class A {\n  int x = 1 < 2;\n}\n");
        assert!(html.contains("<tr id=\"L1\">"));
        assert!(html.contains("<a href=\"#L3\">3</a>"));
        assert!(html.contains("1 &lt; 2"));
        assert!(!html.contains("L4"));
    }

    #[test]
    fn test_render_tree() {
        let src = tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("com/x")).unwrap();
        std::fs::write(
            src.path().join("com/x/Foo.java"),
            "package com.x;\nclass Foo {}\n",
        )
        .unwrap();

        let mut store = ExecutionStore::new();
        store.add_session(SessionInfo {
            id: "host-1".to_string(),
            start: 0,
            dump: 1_000,
        });
        store.put(ExecutionData::new(1, "com/x/Foo", vec![true, false]));
        let classes: ClassSet = [
            CompiledClass::new("com/x/Foo.class", 1),
            CompiledClass::new("com/x/Foo$Inner.class", 2),
            CompiledClass::new("Top.class", 3),
        ]
        .into_iter()
        .collect();
        let warning = TraceWarning {
            environment: Environment::Instrumented,
            path: "bad-coverage.ec".into(),
            reason: "unknown block type 0x42".to_string(),
        };
        let model = CoverageModel::build(
            store,
            &classes,
            &SourceDirectorySet::new([src.path()]),
            vec![warning],
        );

        let out = tempdir().unwrap();
        let layout = ReportLayout::under(out.path());
        let written = HtmlReport
            .render(&model, &ReportMeta::new("app"), &layout)
            .unwrap();
        // index, sessions, 2 package pages, 3 class pages
        assert_eq!(written.len(), 7);

        let index = std::fs::read_to_string(layout.html_dir.join("index.html")).unwrap();
        assert!(index.contains("href=\"com.x/index.html\""));
        assert!(index.contains("(default package)"));
        assert!(index.contains("1 trace file(s) could not be read"));

        let foo = std::fs::read_to_string(layout.html_dir.join("com.x/class-Foo.html")).unwrap();
        assert!(foo.contains("Foo.java"));
        assert!(foo.contains("<tr id=\"L2\">"));
        assert!(foo.contains("probe hit"));

        let inner =
            std::fs::read_to_string(layout.html_dir.join("com.x/class-Foo$Inner.html")).unwrap();
        assert!(inner.contains("not executed"));

        let sessions = std::fs::read_to_string(layout.html_dir.join("sessions.html")).unwrap();
        assert!(sessions.contains("host-1"));
        assert!(sessions.contains("unknown block type 0x42"));
    }

    #[test]
    fn test_class_named_index_keeps_package_page() {
        let classes: ClassSet = [
            CompiledClass::new("com/x/index.class", 1),
            CompiledClass::new("com/x/Main.class", 2),
        ]
        .into_iter()
        .collect();
        let model = CoverageModel::build(
            ExecutionStore::new(),
            &classes,
            &SourceDirectorySet::default(),
            Vec::new(),
        );

        let out = tempdir().unwrap();
        let layout = ReportLayout::under(out.path());
        let written = HtmlReport
            .render(&model, &ReportMeta::new("app"), &layout)
            .unwrap();
        assert_eq!(written.len(), 5);

        let package = std::fs::read_to_string(layout.html_dir.join("com.x/index.html")).unwrap();
        assert!(package.contains("href=\"class-index.html\""));
        assert!(package.contains("href=\"class-Main.html\""));
        assert!(package.contains("no execution data"));
        assert!(layout.html_dir.join("com.x/class-index.html").is_file());
    }
}
