//! A named change list

use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;
use vcsync_core::{Change, ChangeKey};
use vcsync_dirty::DirtyScope;

/// Changes that appeared, disappeared or were replaced during one processing round
#[derive(Debug, Default)]
pub struct ProcessingDelta {
    pub added: Vec<Change>,
    pub removed: Vec<Change>,
    /// Whether anything differs from the state before processing
    pub changed: bool,
}

/// A user-visible grouping of pending changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeList {
    id: Uuid,
    name: String,
    comment: String,
    default: bool,
    read_only: bool,
    changes: BTreeMap<ChangeKey, Change>,
    /// Snapshot taken by `start_processing`, released by `done_processing`
    changes_before_update: Option<BTreeMap<ChangeKey, Change>>,
}

impl ChangeList {
    /// Create an empty, non-default list
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            comment: String::new(),
            default: false,
            read_only: false,
            changes: BTreeMap::new(),
            changes_before_update: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn is_default(&self) -> bool {
        self.default
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Changes in identity order
    pub fn changes(&self) -> impl Iterator<Item = &Change> + '_ {
        self.changes.values()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn contains(&self, key: &ChangeKey) -> bool {
        self.changes.contains_key(key)
    }

    pub fn get(&self, key: &ChangeKey) -> Option<&Change> {
        self.changes.get(key)
    }

    /// Change with `path` on either side
    pub fn find_by_path(&self, path: &Path) -> Option<&Change> {
        self.changes.values().find(|change| change.touches(path))
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub(crate) fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    pub(crate) fn set_default(&mut self, default: bool) {
        self.default = default;
    }

    pub(crate) fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Insert `change`, returning the change it replaced
    pub(crate) fn add_change(&mut self, change: Change) -> Option<Change> {
        self.changes.insert(change.key(), change)
    }

    pub(crate) fn remove_change(&mut self, key: &ChangeKey) -> Option<Change> {
        self.changes.remove(key)
    }

    /// Begin a processing round: remember the current changes and withdraw
    /// those the scope covers (all of them without a scope)
    pub(crate) fn start_processing(&mut self, scope: Option<&DirtyScope>) -> Vec<Change> {
        self.changes_before_update = Some(self.changes.clone());

        let affected: Vec<ChangeKey> = self
            .changes
            .iter()
            .filter(|(_, change)| scope.map_or(true, |scope| scope.affects_change(change)))
            .map(|(key, _)| key.clone())
            .collect();

        affected
            .iter()
            .filter_map(|key| self.changes.remove(key))
            .collect()
    }

    /// Claim `change` if it belonged here before the round started
    ///
    /// The default list claims every change offered to it. An unclaimed
    /// change is handed back.
    pub(crate) fn process_change(&mut self, change: Change) -> Option<Change> {
        let known = self.default
            || self
                .changes_before_update
                .as_ref()
                .is_some_and(|before| before.contains_key(&change.key()));
        if known {
            self.add_change(change);
            None
        } else {
            Some(change)
        }
    }

    /// End a processing round, diffing against the remembered changes
    pub(crate) fn done_processing(&mut self) -> ProcessingDelta {
        let Some(before) = self.changes_before_update.take() else {
            return ProcessingDelta::default();
        };

        let added: Vec<Change> = self
            .changes
            .iter()
            .filter(|(key, _)| !before.contains_key(key))
            .map(|(_, change)| change.clone())
            .collect();
        let removed: Vec<Change> = before
            .iter()
            .filter(|(key, _)| !self.changes.contains_key(key))
            .map(|(_, change)| change.clone())
            .collect();
        let replaced = self
            .changes
            .iter()
            .any(|(key, change)| before.get(key).is_some_and(|old| old != change));

        ProcessingDelta {
            changed: replaced || !added.is_empty() || !removed.is_empty(),
            added,
            removed,
        }
    }

    pub(crate) fn is_processing(&self) -> bool {
        self.changes_before_update.is_some()
    }
}
