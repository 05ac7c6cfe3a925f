//! Notifications published to change-list listeners

use std::path::PathBuf;
use vcsync_core::{Change, VcsError};

/// A change-list model notification
///
/// Lists are referred to by name as of the moment the event was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeListEvent {
    ListAdded { name: String },
    ListRemoved { name: String },
    ListRenamed { from: String, to: String },
    CommentChanged { name: String, comment: String },
    ReadOnlyChanged { name: String, read_only: bool },
    /// The list's content changed during a reconciliation pass
    ListChanged { name: String },
    ChangesAdded { list: String, changes: Vec<Change> },
    ChangesRemoved { list: String, changes: Vec<Change> },
    ChangesMoved { from: String, to: String, changes: Vec<Change> },
    DefaultListChanged { from: Option<String>, to: String },
    /// Paths whose change status differs between two model snapshots
    FileStatusesChanged { paths: Vec<PathBuf> },
    /// Unversioned/ignored/locked categorisation changed
    UnchangedFileStatusChanged,
    /// A reconciliation pass ended (whatever its outcome)
    UpdateDone,
    /// A reconciliation pass failed and its results were discarded
    UpdateFailed { error: VcsError },
}
