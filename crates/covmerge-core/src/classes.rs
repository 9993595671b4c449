//! Compiled-class view of the library.
//!
//! A [`ClassSet`] maps `/`-separated relative class-file paths to their class
//! identifiers. The full scan of the compiler output is the compiled class
//! set; the result of [`crate::filter::filter`] is the filtered class set, a
//! subset of it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::domain::{CovError, Result};
use crate::exec::class_id;

const CLASS_SUFFIX: &str = ".class";

/// One compiled class file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompiledClass {
    /// Path relative to the class root, always `/`-separated.
    pub path: String,
    /// Identifier computed from the class bytes.
    pub id: u64,
}

impl CompiledClass {
    pub fn new(path: impl AsRef<str>, id: u64) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            id,
        }
    }

    /// VM name: the path without the `.class` suffix.
    pub fn vm_name(&self) -> &str {
        self.path.strip_suffix(CLASS_SUFFIX).unwrap_or(&self.path)
    }

    /// Package in VM form (`com/example`); empty for the default package.
    pub fn package(&self) -> &str {
        match self.vm_name().rfind('/') {
            Some(idx) => &self.vm_name()[..idx],
            None => "",
        }
    }

    /// Class name without the package (`Foo$Bar`).
    pub fn simple_name(&self) -> &str {
        let name = self.vm_name();
        match name.rfind('/') {
            Some(idx) => &name[idx + 1..],
            None => name,
        }
    }
}

/// Replace platform separators with `/` and drop a leading `./`.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.strip_prefix("./").unwrap_or(&path).to_string()
}

/// A set of compiled classes keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSet {
    classes: BTreeMap<String, CompiledClass>,
}

/// Every class the compiler produced.
pub type CompiledClassSet = ClassSet;

/// The classes that count toward coverage after exclusion.
pub type FilteredClassSet = ClassSet;

impl ClassSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `root` recursively for `.class` files and compute their ids.
    ///
    /// The scan is repeated on every run; compiler output may change between
    /// runs.
    pub fn scan(root: &Path) -> Result<Self> {
        let scan_err = |source: std::io::Error| CovError::ClassScan {
            path: root.to_path_buf(),
            source,
        };

        let mut set = Self::new();
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| scan_err(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("class") {
                continue;
            }
            let rel = path.strip_prefix(root).unwrap_or(path);
            let bytes = std::fs::read(path).map_err(scan_err)?;
            set.insert(CompiledClass::new(rel.to_string_lossy(), class_id(&bytes)));
        }

        tracing::debug!(root = %root.display(), classes = set.len(), "scanned compiled classes");
        Ok(set)
    }

    /// Build a set from relative paths with unknown ids (zero).
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        paths
            .into_iter()
            .map(|p| CompiledClass::new(p, 0))
            .collect()
    }

    pub fn insert(&mut self, class: CompiledClass) {
        self.classes.insert(class.path.clone(), class);
    }

    pub fn get(&self, path: &str) -> Option<&CompiledClass> {
        self.classes.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.classes.contains_key(path)
    }

    /// Classes in path order.
    pub fn iter(&self) -> impl Iterator<Item = &CompiledClass> {
        self.classes.values()
    }

    /// Relative paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Whether every class of `self` is also in `other` with the same id.
    pub fn is_subset_of(&self, other: &ClassSet) -> bool {
        self.classes
            .iter()
            .all(|(path, class)| other.classes.get(path) == Some(class))
    }
}

impl FromIterator<CompiledClass> for ClassSet {
    fn from_iter<T: IntoIterator<Item = CompiledClass>>(iter: T) -> Self {
        let mut set = ClassSet::new();
        for class in iter {
            set.insert(class);
        }
        set
    }
}

/// Resolve a class root, rejecting a path that is missing or not a directory.
pub fn require_class_root(root: &Path) -> std::io::Result<PathBuf> {
    let meta = std::fs::metadata(root)?;
    if !meta.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a directory", root.display()),
        ));
    }
    Ok(root.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_class_names() {
        let class = CompiledClass::new("com/example/Foo$Bar.class", 1);
        assert_eq!(class.vm_name(), "com/example/Foo$Bar");
        assert_eq!(class.package(), "com/example");
        assert_eq!(class.simple_name(), "Foo$Bar");

        let class = CompiledClass::new("Top.class", 1);
        assert_eq!(class.package(), "");
        assert_eq!(class.simple_name(), "Top");
    }

    #[test]
    fn test_paths_are_normalized() {
        let class = CompiledClass::new(r"com\example\Foo.class", 1);
        assert_eq!(class.path, "com/example/Foo.class");
        assert_eq!(normalize_path("./a/B.class"), "a/B.class");
    }

    #[test]
    fn test_scan_finds_class_files_only() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("com/example");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("Foo.class"), b"foo-bytes").unwrap();
        std::fs::write(pkg.join("Foo$1.class"), b"inner-bytes").unwrap();
        std::fs::write(pkg.join("notes.txt"), b"ignored").unwrap();

        let set = ClassSet::scan(dir.path()).unwrap();
        let paths: Vec<&str> = set.paths().collect();
        assert_eq!(paths, vec!["com/example/Foo$1.class", "com/example/Foo.class"]);
        assert_eq!(
            set.get("com/example/Foo.class").unwrap().id,
            class_id(b"foo-bytes")
        );
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let dir = tempdir().unwrap();
        let err = ClassSet::scan(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, CovError::ClassScan { .. }));
    }

    #[test]
    fn test_subset() {
        let all = ClassSet::from_paths(["a/A.class", "a/B.class"]);
        let some = ClassSet::from_paths(["a/A.class"]);
        assert!(some.is_subset_of(&all));
        assert!(!all.is_subset_of(&some));
    }

    #[test]
    fn test_require_class_root() {
        let dir = tempdir().unwrap();
        assert!(require_class_root(dir.path()).is_ok());
        assert!(require_class_root(&dir.path().join("nope")).is_err());
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        assert!(require_class_root(&file).is_err());
    }
}
