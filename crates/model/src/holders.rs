//! Categorised file sets: unversioned, ignored, modified-without-checkout,
//! locked and logically locked paths

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use vcsync_core::{FilePath, FileStatus, IgnoredFileRules};
use vcsync_dirty::DirtyScope;

/// File category kept by [`FileHolderComposite`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderKind {
    Unversioned,
    ModifiedWithoutCheckout,
    Ignored,
    Locked,
    LogicallyLocked,
}

impl HolderKind {
    pub const ALL: [HolderKind; 5] = [
        HolderKind::Unversioned,
        HolderKind::ModifiedWithoutCheckout,
        HolderKind::Ignored,
        HolderKind::Locked,
        HolderKind::LogicallyLocked,
    ];

    /// Status a path in this category reports
    pub fn file_status(self) -> FileStatus {
        match self {
            HolderKind::Unversioned => FileStatus::Unversioned,
            HolderKind::ModifiedWithoutCheckout => FileStatus::ModifiedWithoutCheckout,
            HolderKind::Ignored => FileStatus::Ignored,
            HolderKind::Locked | HolderKind::LogicallyLocked => FileStatus::Locked,
        }
    }
}

/// One category of paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHolder {
    /// path -> is_directory
    files: BTreeMap<PathBuf, bool>,
}

impl FileHolder {
    pub fn add(&mut self, file: &FilePath) -> bool {
        self.files.insert(file.path.clone(), file.is_directory).is_none()
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.files.remove(path).is_some()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn files(&self) -> impl Iterator<Item = FilePath> + '_ {
        self.files.iter().map(|(path, &is_directory)| FilePath {
            path: path.clone(),
            is_directory,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Drop every path the scope covers
    pub fn clean_scope(&mut self, scope: &DirtyScope) {
        self.files.retain(|path, _| !scope.belongs_to(path));
    }
}

/// All file categories of one model snapshot
///
/// Categories are disjoint: adding a path to one removes it from the others.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHolderComposite {
    unversioned: FileHolder,
    modified_without_checkout: FileHolder,
    ignored: FileHolder,
    locked: FileHolder,
    logically_locked: FileHolder,
}

impl FileHolderComposite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self, kind: HolderKind) -> &FileHolder {
        match kind {
            HolderKind::Unversioned => &self.unversioned,
            HolderKind::ModifiedWithoutCheckout => &self.modified_without_checkout,
            HolderKind::Ignored => &self.ignored,
            HolderKind::Locked => &self.locked,
            HolderKind::LogicallyLocked => &self.logically_locked,
        }
    }

    fn holder_mut(&mut self, kind: HolderKind) -> &mut FileHolder {
        match kind {
            HolderKind::Unversioned => &mut self.unversioned,
            HolderKind::ModifiedWithoutCheckout => &mut self.modified_without_checkout,
            HolderKind::Ignored => &mut self.ignored,
            HolderKind::Locked => &mut self.locked,
            HolderKind::LogicallyLocked => &mut self.logically_locked,
        }
    }

    /// Put `file` in the `kind` category
    pub fn add(&mut self, kind: HolderKind, file: &FilePath) -> bool {
        for other in HolderKind::ALL {
            if other != kind {
                self.holder_mut(other).remove(&file.path);
            }
        }
        self.holder_mut(kind).add(file)
    }

    pub fn contains(&self, kind: HolderKind, path: &Path) -> bool {
        self.holder(kind).contains(path)
    }

    /// Category of `path`, if it is in one
    pub fn kind_of(&self, path: &Path) -> Option<HolderKind> {
        HolderKind::ALL
            .into_iter()
            .find(|&kind| self.holder(kind).contains(path))
    }

    /// Status of `path` according to the categories
    pub fn status(&self, path: &Path) -> Option<FileStatus> {
        self.kind_of(path).map(HolderKind::file_status)
    }

    /// Empty every category (full rescan)
    pub fn clean_all(&mut self) {
        for kind in HolderKind::ALL {
            self.holder_mut(kind).clear();
        }
    }

    /// Drop every path the scope covers, in every category
    pub fn clean_and_adjust_scope(&mut self, scope: &DirtyScope) {
        for kind in HolderKind::ALL {
            self.holder_mut(kind).clean_scope(scope);
        }
    }

    /// Move unversioned and modified-without-checkout paths matching `rules`
    /// to the ignored category
    ///
    /// Returns the number of paths moved.
    pub fn exchange_with_ignored(&mut self, rules: &IgnoredFileRules) -> usize {
        if rules.is_empty() {
            return 0;
        }

        let matched: Vec<FilePath> = [HolderKind::Unversioned, HolderKind::ModifiedWithoutCheckout]
            .into_iter()
            .flat_map(|kind| self.holder(kind).files())
            .filter(|file| rules.is_ignored(&file.path, file.is_directory))
            .collect();

        for file in &matched {
            self.add(HolderKind::Ignored, file);
        }
        matched.len()
    }

    /// Paths whose status depends on ignore rules
    pub fn unversioned_and_ignored(&self) -> Vec<FilePath> {
        self.unversioned.files().chain(self.ignored.files()).collect()
    }
}
