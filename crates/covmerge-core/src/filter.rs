//! Exclusion rules for compiled classes.
//!
//! Patterns use Ant-style globs over `/`-separated relative class paths:
//!
//! - `**/` matches zero or more leading directories
//! - a trailing `/**` matches everything below a directory
//! - `*` and `?` match within one path segment only
//! - `**` inside a segment (`filters/**.*`) behaves like `*`
//!
//! A class is excluded when ANY rule matches. Exclusion is a union, so the
//! order of the rule list never changes the result.

use regex::Regex;
use serde::Serialize;

use crate::classes::{normalize_path, ClassSet};
use crate::domain::{CovError, Result};

/// Exclusions for a typical Android library build: generated resources and
/// build config, manifests, framework namespaces, view-injection glue, DI
/// factories and the OpenGL filters package which has no tests.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    "**/R.class",
    "**/R$*.class",
    "**/BuildConfig.*",
    "**/Manifest*.*",
    "android/**",
    "androidx/**",
    "com/google/**",
    "**/*$ViewInjector*.*",
    "**/Dagger*Component.class",
    "**/Dagger*Component$Builder.class",
    "**/*Module_*Factory.class",
    "**/com/otaliastudios/cameraview/filters/**.*",
];

/// Shape of an exclusion pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// A fixed file name in any directory (`**/R.class`).
    ExactName,
    /// Wildcards within segments or an anchored namespace (`**/R$*.class`, `android/**`).
    WildcardSegment,
    /// Everything below a sub-package wherever it sits (`**/pkg/filters/**.*`).
    SuffixFamily,
}

/// One compiled exclusion pattern.
#[derive(Debug, Clone)]
pub struct ExclusionRule {
    pattern: String,
    kind: RuleKind,
    regex: Regex,
}

impl ExclusionRule {
    /// Parse and compile a pattern.
    ///
    /// Empty patterns, absolute patterns, `.` / `..` segments, empty segments
    /// and runs of three or more `*` are rejected.
    pub fn parse(pattern: &str) -> Result<Self> {
        let invalid = |reason: &str| CovError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let normalized = normalize_path(pattern.trim());
        if normalized.is_empty() {
            return Err(invalid("pattern is empty"));
        }
        if normalized.starts_with('/') {
            return Err(invalid("patterns must be relative to the class root"));
        }
        let segments: Vec<&str> = normalized.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("pattern contains an empty path segment"));
        }
        if segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(invalid("pattern contains a relative path segment"));
        }
        if normalized.contains("***") {
            return Err(invalid("`***` is not a valid wildcard"));
        }

        let regex = Regex::new(&to_regex(&segments))
            .map_err(|e| invalid(&format!("cannot compile pattern: {}", e)))?;

        Ok(Self {
            kind: classify(&segments),
            pattern: normalized,
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Case-sensitive match against a relative class path.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(&normalize_path(path))
    }
}

fn is_wild(segment: &str) -> bool {
    segment.contains('*') || segment.contains('?')
}

fn classify(segments: &[&str]) -> RuleKind {
    let floating = segments.first() == Some(&"**");
    let body = if floating { &segments[1..] } else { segments };
    let subtree = body.last().is_some_and(|s| s.contains("**"));

    if body.is_empty() {
        RuleKind::WildcardSegment
    } else if floating && subtree && body.len() > 1 {
        RuleKind::SuffixFamily
    } else if floating && body.len() == 1 && !is_wild(body[0]) {
        RuleKind::ExactName
    } else if !body.iter().any(|s| is_wild(s)) {
        RuleKind::ExactName
    } else {
        RuleKind::WildcardSegment
    }
}

fn segment_to_regex(segment: &str, out: &mut String) {
    let mut chars = segment.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                out.push_str("[^/]*");
            }
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
}

fn to_regex(segments: &[&str]) -> String {
    let mut out = String::from("^");
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if *segment == "**" {
            if i == last {
                if i == 0 {
                    out.push_str(".*");
                } else {
                    // `dir/**` also matches `dir` itself.
                    out.pop();
                    out.push_str("(?:/.*)?");
                }
            } else {
                out.push_str("(?:[^/]*/)*");
            }
            continue;
        }
        segment_to_regex(segment, &mut out);
        if i != last {
            out.push('/');
        }
    }
    out.push('$');
    out
}

/// An ordered list of exclusion rules; order does not affect matching.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    rules: Vec<ExclusionRule>,
}

impl ExclusionRules {
    /// Compile a list of patterns, failing on the first malformed one.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .map(|p| ExclusionRule::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// The built-in Android library exclusions.
    pub fn android_defaults() -> Self {
        Self::new(DEFAULT_EXCLUSIONS).expect("default exclusion patterns are valid")
    }

    /// Whether any rule excludes `path`.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.rules.iter().any(|r| r.matches(path))
    }

    /// The first rule (in list order) matching `path`, for diagnostics.
    pub fn matching_rule(&self, path: &str) -> Option<&ExclusionRule> {
        self.rules.iter().find(|r| r.matches(path))
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    pub fn patterns(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.pattern.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Remove every class matched by a rule. Pure and deterministic.
pub fn filter(classes: &ClassSet, rules: &ExclusionRules) -> ClassSet {
    let filtered: ClassSet = classes
        .iter()
        .filter(|class| !rules.is_excluded(&class.path))
        .cloned()
        .collect();

    tracing::debug!(
        total = classes.len(),
        kept = filtered.len(),
        excluded = classes.len() - filtered.len(),
        rules = rules.len(),
        "applied exclusion rules"
    );
    filtered
}
