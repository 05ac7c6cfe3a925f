//! Changes, content revisions and file statuses

use crate::path::FilePath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A file at a specific revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRevision {
    /// File the revision belongs to
    pub file: FilePath,
    /// Backend revision identifier
    ///
    /// `None` marks a placeholder restored from persisted state; it carries
    /// the path identity only and is superseded by the next scan.
    pub revision: Option<String>,
}

impl ContentRevision {
    /// Create a revision of `file`
    pub fn new(file: FilePath, revision: impl Into<String>) -> Self {
        Self {
            file,
            revision: Some(revision.into()),
        }
    }

    /// Create a placeholder revision with no backend identifier
    pub fn placeholder(file: FilePath) -> Self {
        Self {
            file,
            revision: None,
        }
    }

    /// Path of the revision's file
    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

/// Kind of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    /// File added
    New,
    /// File deleted
    Deleted,
    /// File content modified in place
    Modification,
    /// File moved or renamed (possibly modified too)
    Moved,
}

/// Identity of a change: its before and after paths
///
/// `Change` values are rebuilt on every scan, so list assignment is carried
/// across scans by key rather than by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeKey {
    pub before: Option<PathBuf>,
    pub after: Option<PathBuf>,
}

/// A before/after content-revision pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Change {
    /// Revision before the change (`None` for additions)
    pub before: Option<ContentRevision>,
    /// Revision after the change (`None` for deletions)
    pub after: Option<ContentRevision>,
}

impl Change {
    /// Create a change from its two sides
    ///
    /// At least one side must be present.
    pub fn new(before: Option<ContentRevision>, after: Option<ContentRevision>) -> Self {
        debug_assert!(before.is_some() || after.is_some(), "change with no sides");
        Self { before, after }
    }

    /// Addition of `file` at `revision`
    pub fn added(file: FilePath, revision: impl Into<String>) -> Self {
        Self::new(None, Some(ContentRevision::new(file, revision)))
    }

    /// Deletion of `file` last seen at `revision`
    pub fn deleted(file: FilePath, revision: impl Into<String>) -> Self {
        Self::new(Some(ContentRevision::new(file, revision)), None)
    }

    /// In-place modification of `file`
    pub fn modified(file: FilePath, before_revision: impl Into<String>) -> Self {
        Self::new(
            Some(ContentRevision::new(file.clone(), before_revision)),
            Some(ContentRevision::placeholder(file)),
        )
    }

    /// Move of `from` to `to`
    pub fn moved(from: FilePath, to: FilePath, before_revision: impl Into<String>) -> Self {
        Self::new(
            Some(ContentRevision::new(from, before_revision)),
            Some(ContentRevision::placeholder(to)),
        )
    }

    /// Kind of this change
    pub fn change_type(&self) -> ChangeType {
        match (&self.before, &self.after) {
            (None, _) => ChangeType::New,
            (_, None) => ChangeType::Deleted,
            (Some(before), Some(after)) if before.path() != after.path() => ChangeType::Moved,
            _ => ChangeType::Modification,
        }
    }

    /// Path the change is reported under (after path, else before path)
    pub fn path(&self) -> &Path {
        match (&self.after, &self.before) {
            (Some(after), _) => after.path(),
            (None, Some(before)) => before.path(),
            (None, None) => Path::new(""),
        }
    }

    /// Path identity of this change
    pub fn key(&self) -> ChangeKey {
        ChangeKey {
            before: self.before.as_ref().map(|r| r.path().to_path_buf()),
            after: self.after.as_ref().map(|r| r.path().to_path_buf()),
        }
    }

    /// Whether the change moves the file to another directory
    pub fn is_moved(&self) -> bool {
        match (&self.before, &self.after) {
            (Some(before), Some(after)) => before.path().parent() != after.path().parent(),
            _ => false,
        }
    }

    /// Whether the change renames the file within the same directory
    pub fn is_renamed(&self) -> bool {
        match (&self.before, &self.after) {
            (Some(before), Some(after)) => {
                before.path().parent() == after.path().parent() && before.path() != after.path()
            }
            _ => false,
        }
    }

    /// Whether either side of the change refers to `path`
    pub fn touches(&self, path: &Path) -> bool {
        self.before.as_ref().is_some_and(|r| r.path() == path)
            || self.after.as_ref().is_some_and(|r| r.path() == path)
    }

    /// Status this change gives its reported path
    pub fn file_status(&self) -> FileStatus {
        match self.change_type() {
            ChangeType::New => FileStatus::Added,
            ChangeType::Deleted => FileStatus::Deleted,
            ChangeType::Modification => FileStatus::Modified,
            ChangeType::Moved => FileStatus::Moved,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.before, &self.after) {
            (Some(before), Some(after)) if before.path() != after.path() => write!(
                f,
                "{} -> {}",
                before.path().display(),
                after.path().display()
            ),
            _ => write!(f, "{:?} {}", self.change_type(), self.path().display()),
        }
    }
}

/// Version-control status of a single path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    NotChanged,
    Added,
    Modified,
    Deleted,
    Moved,
    Unversioned,
    Ignored,
    ModifiedWithoutCheckout,
    Switched,
    Locked,
}
