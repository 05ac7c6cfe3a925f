//! Per-root dirty marks with ancestor/descendant pruning
//!
//! Two kinds of marks are kept:
//! - recursive directory marks: the directory and everything below it is dirty
//! - non-recursive marks: a single file, or a directory whose *entries* are
//!   dirty (its immediate children, not deeper descendants)
//!
//! The set stays minimal: a mark already implied by another mark is never
//! stored.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use vcsync_core::{FilePath, VcsRoot};

/// A single dirty mark
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtyMark {
    /// File, or directory entries (non-recursive)
    File(FilePath),
    /// Directory subtree
    RecursiveDir(PathBuf),
}

/// Minimal set of dirty marks for one version-control root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyMarkSet {
    root: VcsRoot,
    /// Non-recursive marks: path -> is_directory
    files: BTreeMap<PathBuf, bool>,
    /// Recursive directory marks
    dirs: BTreeSet<PathBuf>,
}

impl DirtyMarkSet {
    /// Create an empty mark set for `root`
    pub fn new(root: VcsRoot) -> Self {
        Self {
            root,
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
        }
    }

    /// Root this set belongs to
    pub fn root(&self) -> &VcsRoot {
        &self.root
    }

    /// Mark a file (or a directory's entries) dirty
    ///
    /// Returns true if the set changed.
    pub fn add_file(&mut self, file: &FilePath) -> bool {
        if self.is_recursively_dirty(&file.path) {
            return false;
        }

        // A plain file listed by a dirty parent directory is already covered
        if !file.is_directory {
            if let Some(parent) = file.path.parent() {
                if self.files.get(parent) == Some(&true) {
                    return false;
                }
            }
        }

        if file.is_directory {
            self.prune_plain_children(&file.path);
        }

        match self.files.get_mut(&file.path) {
            Some(is_dir) => {
                if file.is_directory && !*is_dir {
                    *is_dir = true;
                    return true;
                }
                false
            }
            None => {
                self.files.insert(file.path.clone(), file.is_directory);
                true
            }
        }
    }

    /// Mark a directory subtree dirty
    ///
    /// Returns true if the set changed.
    pub fn add_dir_recursive(&mut self, dir: &Path) -> bool {
        if self.is_recursively_dirty(dir) {
            return false;
        }

        let covered_dirs: Vec<PathBuf> = self
            .dirs
            .range::<Path, _>((Bound::Included(dir), Bound::Unbounded))
            .take_while(|path| path.starts_with(dir))
            .cloned()
            .collect();
        for path in covered_dirs {
            self.dirs.remove(&path);
        }

        let covered_files: Vec<PathBuf> = self
            .files
            .range::<Path, _>((Bound::Included(dir), Bound::Unbounded))
            .take_while(|(path, _)| path.starts_with(dir))
            .map(|(path, _)| path.clone())
            .collect();
        for path in covered_files {
            self.files.remove(&path);
        }

        self.dirs.insert(dir.to_path_buf());
        true
    }

    /// Check if some recursive mark covers `path`
    pub fn is_recursively_dirty(&self, path: &Path) -> bool {
        path.ancestors().any(|ancestor| self.dirs.contains(ancestor))
    }

    /// Check if `path` is dirty by any mark
    pub fn contains(&self, path: &Path) -> bool {
        if self.is_recursively_dirty(path) || self.files.contains_key(path) {
            return true;
        }
        match path.parent() {
            Some(parent) => self.files.get(parent) == Some(&true),
            None => false,
        }
    }

    /// Merge every mark of `other` into this set
    pub fn merge(&mut self, other: &DirtyMarkSet) -> bool {
        let mut changed = false;
        for dir in &other.dirs {
            changed |= self.add_dir_recursive(dir);
        }
        for (path, &is_directory) in &other.files {
            changed |= self.add_file(&FilePath {
                path: path.clone(),
                is_directory,
            });
        }
        changed
    }

    /// Non-recursive marks in path order
    pub fn files(&self) -> impl Iterator<Item = FilePath> + '_ {
        self.files.iter().map(|(path, &is_directory)| FilePath {
            path: path.clone(),
            is_directory,
        })
    }

    /// Recursive directory marks in path order
    pub fn recursive_dirs(&self) -> impl Iterator<Item = &Path> + '_ {
        self.dirs.iter().map(PathBuf::as_path)
    }

    /// All marks, recursive directories first
    pub fn marks(&self) -> Vec<DirtyMark> {
        self.dirs
            .iter()
            .cloned()
            .map(DirtyMark::RecursiveDir)
            .chain(self.files().map(DirtyMark::File))
            .collect()
    }

    /// Number of marks
    pub fn len(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    /// Check if there are no marks
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    /// Drop plain-file marks directly inside `dir`
    fn prune_plain_children(&mut self, dir: &Path) {
        let children: Vec<PathBuf> = self
            .files
            .range::<Path, _>((Bound::Excluded(dir), Bound::Unbounded))
            .take_while(|(path, _)| path.starts_with(dir))
            .filter(|(path, &is_dir)| !is_dir && path.parent() == Some(dir))
            .map(|(path, _)| path.clone())
            .collect();
        for path in children {
            self.files.remove(&path);
        }
    }
}
