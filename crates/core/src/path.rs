//! File paths, version-control roots and root resolution

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A path known to the engine, with its file/directory nature
///
/// Paths are compared component-wise, so `/a/b` sorts directly after `/a`
/// and before `/a-b`; descendants of a directory are therefore contiguous
/// in any ordered collection of `FilePath`s or `PathBuf`s.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FilePath {
    /// Absolute path
    pub path: PathBuf,
    /// Whether the path denotes a directory
    pub is_directory: bool,
}

impl FilePath {
    /// Create a file (non-directory) path
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
        }
    }

    /// Create a directory path
    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
        }
    }

    /// Get the underlying path
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Parent directory, if any
    pub fn parent(&self) -> Option<&Path> {
        self.path.parent()
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        if self.is_directory {
            write!(f, "/")?;
        }
        Ok(())
    }
}

/// Check whether `ancestor` is an ancestor of `path`
///
/// Comparison is component-wise (`/a` is not an ancestor of `/ab`). With
/// `strict == false` a path counts as its own ancestor.
pub fn is_ancestor(ancestor: &Path, path: &Path, strict: bool) -> bool {
    if strict && ancestor == path {
        return false;
    }
    path.starts_with(ancestor)
}

/// Name of a version-control backend ("git", "hg", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VcsKey(String);

impl VcsKey {
    /// Create a new backend key
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Backend name
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VcsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A version-control-managed directory subtree and its backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VcsRoot {
    /// Root directory of the subtree
    pub path: PathBuf,
    /// Backend managing the subtree
    pub vcs: VcsKey,
}

impl VcsRoot {
    /// Create a new root
    pub fn new(path: impl Into<PathBuf>, vcs: VcsKey) -> Self {
        Self {
            path: path.into(),
            vcs,
        }
    }

    /// Check if `path` lies inside this root (the root itself included)
    pub fn contains(&self, path: &Path) -> bool {
        is_ancestor(&self.path, path, false)
    }
}

impl fmt::Display for VcsRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path.display(), self.vcs)
    }
}

/// Maps paths to the version-control root that owns them
pub trait RootResolver: Send + Sync {
    /// Root owning `path`, or `None` if the path is not under any tracked root
    fn resolve_root(&self, path: &Path) -> Option<VcsRoot>;

    /// All tracked roots
    fn roots(&self) -> Vec<VcsRoot>;
}

/// Root resolver backed by an explicit list of roots
///
/// Nested roots are allowed; a path resolves to the deepest root containing it.
#[derive(Debug, Default)]
pub struct StaticRootResolver {
    roots: RwLock<Vec<VcsRoot>>,
}

impl StaticRootResolver {
    /// Create a resolver with no roots
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resolver with the given roots
    pub fn with_roots(roots: impl IntoIterator<Item = VcsRoot>) -> Self {
        let resolver = Self::new();
        for root in roots {
            resolver.add_root(root);
        }
        resolver
    }

    /// Register a root (no-op if already present)
    pub fn add_root(&self, root: VcsRoot) {
        let mut roots = self.roots.write();
        if !roots.contains(&root) {
            roots.push(root);
        }
    }

    /// Unregister the root at `path`
    pub fn remove_root(&self, path: &Path) -> bool {
        let mut roots = self.roots.write();
        let before = roots.len();
        roots.retain(|root| root.path != path);
        roots.len() != before
    }
}

impl RootResolver for StaticRootResolver {
    fn resolve_root(&self, path: &Path) -> Option<VcsRoot> {
        self.roots
            .read()
            .iter()
            .filter(|root| root.contains(path))
            .max_by_key(|root| root.path.components().count())
            .cloned()
    }

    fn roots(&self) -> Vec<VcsRoot> {
        self.roots.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git() -> VcsKey {
        VcsKey::new("git")
    }

    #[test]
    fn test_is_ancestor_component_wise() {
        assert!(is_ancestor(Path::new("/a"), Path::new("/a/b"), true));
        assert!(is_ancestor(Path::new("/a"), Path::new("/a"), false));
        assert!(!is_ancestor(Path::new("/a"), Path::new("/a"), true));
        assert!(!is_ancestor(Path::new("/a"), Path::new("/ab"), false));
        assert!(!is_ancestor(Path::new("/a/b"), Path::new("/a"), false));
    }

    #[test]
    fn test_path_ordering_keeps_descendants_contiguous() {
        let mut paths = vec![
            PathBuf::from("/a-b"),
            PathBuf::from("/a/c"),
            PathBuf::from("/a"),
            PathBuf::from("/a/b/d"),
        ];
        paths.sort();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/a"),
                PathBuf::from("/a/b/d"),
                PathBuf::from("/a/c"),
                PathBuf::from("/a-b"),
            ]
        );
    }

    #[test]
    fn test_resolve_deepest_root() {
        let resolver = StaticRootResolver::with_roots([
            VcsRoot::new("/repo", git()),
            VcsRoot::new("/repo/vendor/lib", VcsKey::new("hg")),
        ]);

        let root = resolver.resolve_root(Path::new("/repo/src/main.rs")).unwrap();
        assert_eq!(root.path, PathBuf::from("/repo"));

        let nested = resolver
            .resolve_root(Path::new("/repo/vendor/lib/x.c"))
            .unwrap();
        assert_eq!(nested.vcs.name(), "hg");

        assert!(resolver.resolve_root(Path::new("/elsewhere/file")).is_none());
    }

    #[test]
    fn test_add_and_remove_roots() {
        let resolver = StaticRootResolver::new();
        resolver.add_root(VcsRoot::new("/repo", git()));
        resolver.add_root(VcsRoot::new("/repo", git()));
        assert_eq!(resolver.roots().len(), 1);

        assert!(resolver.remove_root(Path::new("/repo")));
        assert!(!resolver.remove_root(Path::new("/repo")));
        assert!(resolver.roots().is_empty());
    }

    #[test]
    fn test_file_path_display() {
        assert_eq!(FilePath::dir("/repo/src").to_string(), "/repo/src/");
        assert_eq!(FilePath::file("/repo/a.txt").to_string(), "/repo/a.txt");
    }
}
