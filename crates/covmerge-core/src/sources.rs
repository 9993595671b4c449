//! Source roots used to annotate reports with source listings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Extensions tried, in order, when locating the source of a class.
const SOURCE_EXTENSIONS: &[&str] = &["java", "kt"];

/// Ordered original and generated source roots. Read-only input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDirectorySet {
    roots: Vec<PathBuf>,
}

impl SourceDirectorySet {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Roots that currently exist on disk.
    pub fn existing_roots(&self) -> impl Iterator<Item = &Path> {
        self.roots.iter().map(PathBuf::as_path).filter(|p| p.is_dir())
    }

    /// Find the source file that defines a VM class name.
    ///
    /// Nested and anonymous classes (`Foo$Bar`, `Foo$1`) resolve to the file
    /// of their outermost class; Kotlin file facades (`FooKt`) also try `Foo`.
    /// Roots are searched in order and the first hit wins.
    pub fn locate(&self, vm_name: &str) -> Option<PathBuf> {
        let outer = vm_name.split('$').next().unwrap_or(vm_name);
        let mut candidates = vec![outer];
        if let Some(facade) = outer.strip_suffix("Kt") {
            if !facade.is_empty() && !facade.ends_with('/') {
                candidates.push(facade);
            }
        }

        for root in &self.roots {
            for stem in &candidates {
                for ext in SOURCE_EXTENSIONS {
                    let candidate = root.join(format!("{}.{}", stem, ext));
                    if candidate.is_file() {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_locate_prefers_first_root() {
        let main = tempdir().unwrap();
        let generated = tempdir().unwrap();
        for root in [main.path(), generated.path()] {
            std::fs::create_dir_all(root.join("com/x")).unwrap();
            std::fs::write(root.join("com/x/Foo.java"), "class Foo {}").unwrap();
        }

        let sources = SourceDirectorySet::new([main.path(), generated.path()]);
        assert_eq!(
            sources.locate("com/x/Foo"),
            Some(main.path().join("com/x/Foo.java"))
        );
    }

    #[test]
    fn test_locate_nested_and_kotlin() {
        let root = tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("com/x")).unwrap();
        std::fs::write(root.path().join("com/x/Outer.java"), "").unwrap();
        std::fs::write(root.path().join("com/x/Utils.kt"), "").unwrap();

        let sources = SourceDirectorySet::new([root.path()]);
        assert_eq!(
            sources.locate("com/x/Outer$Inner$1"),
            Some(root.path().join("com/x/Outer.java"))
        );
        assert_eq!(
            sources.locate("com/x/UtilsKt"),
            Some(root.path().join("com/x/Utils.kt"))
        );
        assert_eq!(sources.locate("com/x/Missing"), None);
    }

    #[test]
    fn test_existing_roots_skips_missing() {
        let root = tempdir().unwrap();
        let sources = SourceDirectorySet::new([root.path().to_path_buf(), root.path().join("gone")]);
        assert_eq!(sources.existing_roots().count(), 1);
        assert_eq!(sources.roots().len(), 2);
    }
}
