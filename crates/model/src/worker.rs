//! The change-list model: lists, change assignment and per-path status
//!
//! A worker is a plain value. The engine keeps one authoritative worker
//! and clones it for each reconciliation pass; the clone is mutated freely
//! and swapped in when the pass commits.

use crate::error::{ModelError, Result};
use crate::events::ChangeListEvent;
use crate::list::ChangeList;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use vcsync_core::{Change, ChangeKey, ContentRevision, FilePath, FileStatus};
use vcsync_dirty::DirtyScope;

/// Branch a switched path points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchedEntry {
    pub branch: String,
    /// Whether the whole subtree is switched
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeListWorker {
    /// Lists in creation order; exactly one is the default
    lists: Vec<ChangeList>,
    /// Reported path of every change -> its status
    index: BTreeMap<PathBuf, FileStatus>,
    locally_deleted: BTreeMap<PathBuf, bool>,
    switched: BTreeMap<PathBuf, SwitchedEntry>,
}

impl ChangeListWorker {
    /// Create a model holding a single empty default list
    pub fn new(default_list_name: &str) -> Self {
        let mut default = ChangeList::new(Uuid::new_v4(), default_list_name);
        default.set_default(true);
        Self::from_lists(vec![default])
    }

    /// Build a model from restored lists
    ///
    /// The first list flagged default stays default; if none is, the first
    /// list is promoted.
    pub(crate) fn from_lists(mut lists: Vec<ChangeList>) -> Self {
        let mut seen_default = false;
        for list in &mut lists {
            if list.is_default() {
                if seen_default {
                    list.set_default(false);
                }
                seen_default = true;
            }
        }
        if !seen_default {
            if let Some(first) = lists.first_mut() {
                first.set_default(true);
            }
        }

        let mut worker = Self {
            lists,
            index: BTreeMap::new(),
            locally_deleted: BTreeMap::new(),
            switched: BTreeMap::new(),
        };
        worker.rebuild_index();
        worker
    }

    // ---- queries ----

    pub fn lists(&self) -> &[ChangeList] {
        &self.lists
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    pub fn default_list(&self) -> Option<&ChangeList> {
        self.lists.iter().find(|list| list.is_default())
    }

    pub fn find_list(&self, name: &str) -> Option<&ChangeList> {
        self.lists.iter().find(|list| list.name() == name)
    }

    pub fn list_by_id(&self, id: Uuid) -> Option<&ChangeList> {
        self.lists.iter().find(|list| list.id() == id)
    }

    /// List holding a change with the identity of `change`
    pub fn list_for_change(&self, change: &Change) -> Option<&ChangeList> {
        let key = change.key();
        self.lists.iter().find(|list| list.contains(&key))
    }

    /// List holding a change with `path` on either side
    pub fn list_for_path(&self, path: &Path) -> Option<&ChangeList> {
        self.lists
            .iter()
            .find(|list| list.find_by_path(path).is_some())
    }

    pub fn change_for_path(&self, path: &Path) -> Option<&Change> {
        self.lists.iter().find_map(|list| list.find_by_path(path))
    }

    pub fn all_changes(&self) -> impl Iterator<Item = &Change> + '_ {
        self.lists.iter().flat_map(|list| list.changes())
    }

    /// Changes with either side under `dir`
    pub fn changes_in(&self, dir: &Path) -> Vec<&Change> {
        self.all_changes()
            .filter(|change| {
                change.before.as_ref().is_some_and(|r| r.path().starts_with(dir))
                    || change.after.as_ref().is_some_and(|r| r.path().starts_with(dir))
            })
            .collect()
    }

    pub fn have_changes_under(&self, dir: &Path) -> bool {
        self.index
            .range::<Path, _>((Bound::Included(dir), Bound::Unbounded))
            .next()
            .is_some_and(|(path, _)| path.starts_with(dir))
    }

    /// Status of `path` as far as changes, deletions and switches go
    pub fn status(&self, path: &Path) -> FileStatus {
        if let Some(status) = self.index.get(path) {
            return *status;
        }
        if self.locally_deleted.contains_key(path) {
            return FileStatus::Deleted;
        }
        if self.switched_branch(path).is_some() {
            return FileStatus::Switched;
        }
        FileStatus::NotChanged
    }

    /// Every before and after path of every change
    pub fn affected_paths(&self) -> Vec<PathBuf> {
        let paths: BTreeSet<PathBuf> = self
            .all_changes()
            .flat_map(|change| [change.before.as_ref(), change.after.as_ref()])
            .flatten()
            .map(|revision| revision.path().to_path_buf())
            .collect();
        paths.into_iter().collect()
    }

    pub fn locally_deleted(&self) -> impl Iterator<Item = FilePath> + '_ {
        self.locally_deleted.iter().map(|(path, &is_directory)| FilePath {
            path: path.clone(),
            is_directory,
        })
    }

    pub fn is_locally_deleted(&self, path: &Path) -> bool {
        self.locally_deleted.contains_key(path)
    }

    pub fn switched(&self) -> impl Iterator<Item = (&Path, &SwitchedEntry)> + '_ {
        self.switched.iter().map(|(path, entry)| (path.as_path(), entry))
    }

    /// Branch `path` is switched to, directly or through a recursive switch
    pub fn switched_branch(&self, path: &Path) -> Option<&str> {
        if let Some(entry) = self.switched.get(path) {
            return Some(&entry.branch);
        }
        path.ancestors()
            .skip(1)
            .find_map(|ancestor| self.switched.get(ancestor).filter(|entry| entry.recursive))
            .map(|entry| entry.branch.as_str())
    }

    // ---- user mutations ----

    pub fn add_change_list(
        &mut self,
        id: Uuid,
        name: &str,
        comment: Option<&str>,
    ) -> Result<Vec<ChangeListEvent>> {
        if self.find_list(name).is_some() {
            return Err(ModelError::DuplicateList(name.to_string()));
        }

        let mut list = ChangeList::new(id, name);
        if let Some(comment) = comment {
            list.set_comment(comment);
        }
        self.lists.push(list);
        Ok(vec![ChangeListEvent::ListAdded {
            name: name.to_string(),
        }])
    }

    /// Remove a list, moving its changes to the default list
    pub fn remove_change_list(&mut self, name: &str) -> Result<Vec<ChangeListEvent>> {
        let position = self.position(name)?;
        if self.lists[position].is_default() {
            return Err(ModelError::CannotRemoveDefault(name.to_string()));
        }

        let removed = self.lists.remove(position);
        let mut events = Vec::new();
        let moved: Vec<Change> = removed.changes().cloned().collect();
        if !moved.is_empty() {
            if let Some(default) = self.lists.iter_mut().find(|list| list.is_default()) {
                for change in &moved {
                    default.add_change(change.clone());
                }
                events.push(ChangeListEvent::ChangesMoved {
                    from: name.to_string(),
                    to: default.name().to_string(),
                    changes: moved,
                });
            }
        }
        events.push(ChangeListEvent::ListRemoved {
            name: name.to_string(),
        });
        Ok(events)
    }

    pub fn set_default(&mut self, name: &str) -> Result<Vec<ChangeListEvent>> {
        let position = self.position(name)?;
        if self.lists[position].is_default() {
            return Ok(Vec::new());
        }

        let previous = self.default_list().map(|list| list.name().to_string());
        for list in &mut self.lists {
            list.set_default(false);
        }
        self.lists[position].set_default(true);
        Ok(vec![ChangeListEvent::DefaultListChanged {
            from: previous,
            to: name.to_string(),
        }])
    }

    /// Rename a list; read-only lists keep their name
    pub fn edit_name(&mut self, from: &str, to: &str) -> Result<Vec<ChangeListEvent>> {
        let position = self.position(from)?;
        if from == to {
            return Ok(Vec::new());
        }
        if self.lists[position].is_read_only() {
            return Err(ModelError::ReadOnly(from.to_string()));
        }
        if self.find_list(to).is_some() {
            return Err(ModelError::DuplicateList(to.to_string()));
        }

        self.lists[position].set_name(to);
        Ok(vec![ChangeListEvent::ListRenamed {
            from: from.to_string(),
            to: to.to_string(),
        }])
    }

    pub fn edit_comment(&mut self, name: &str, comment: &str) -> Result<Vec<ChangeListEvent>> {
        let position = self.position(name)?;
        if self.lists[position].comment() == comment {
            return Ok(Vec::new());
        }

        self.lists[position].set_comment(comment);
        Ok(vec![ChangeListEvent::CommentChanged {
            name: name.to_string(),
            comment: comment.to_string(),
        }])
    }

    pub fn set_read_only(&mut self, name: &str, read_only: bool) -> Result<Vec<ChangeListEvent>> {
        let position = self.position(name)?;
        if self.lists[position].is_read_only() == read_only {
            return Ok(Vec::new());
        }

        self.lists[position].set_read_only(read_only);
        Ok(vec![ChangeListEvent::ReadOnlyChanged {
            name: name.to_string(),
            read_only,
        }])
    }

    /// Move the changes identified by `keys` into list `name`
    ///
    /// Keys not found in any list are skipped.
    pub fn move_changes_to(&mut self, name: &str, keys: &[ChangeKey]) -> Result<Vec<ChangeListEvent>> {
        let target = self.position(name)?;

        let mut moved: Vec<(String, Vec<Change>)> = Vec::new();
        for key in keys {
            let Some(source) = self.lists.iter().position(|list| list.contains(key)) else {
                continue;
            };
            if source == target {
                continue;
            }
            let Some(change) = self.lists[source].remove_change(key) else {
                continue;
            };

            let source_name = self.lists[source].name().to_string();
            match moved.iter_mut().find(|(from, _)| *from == source_name) {
                Some((_, changes)) => changes.push(change.clone()),
                None => moved.push((source_name, vec![change.clone()])),
            }
            self.lists[target].add_change(change);
        }

        Ok(moved
            .into_iter()
            .map(|(from, changes)| ChangeListEvent::ChangesMoved {
                from,
                to: name.to_string(),
                changes,
            })
            .collect())
    }

    // ---- scan-side mutations ----

    /// Put `change` into list `name`; false if there is no such list
    pub fn add_change_to_list(&mut self, name: &str, change: Change) -> bool {
        let Some(target) = self.lists.iter().position(|list| list.name() == name) else {
            return false;
        };

        let key = change.key();
        for (i, list) in self.lists.iter_mut().enumerate() {
            if i != target {
                list.remove_change(&key);
            }
        }
        self.index
            .insert(change.path().to_path_buf(), change.file_status());
        self.lists[target].add_change(change);
        true
    }

    /// Put `change` into the list that held its identity before this round,
    /// else into the default list
    pub fn add_change_to_corresponding_list(&mut self, change: Change) {
        self.index
            .insert(change.path().to_path_buf(), change.file_status());

        let mut change = change;
        for list in self.lists.iter_mut().filter(|list| !list.is_default()) {
            match list.process_change(change) {
                None => return,
                Some(unclaimed) => change = unclaimed,
            }
        }

        let fallback = self
            .lists
            .iter()
            .position(|list| list.is_default())
            .unwrap_or(0);
        if let Some(list) = self.lists.get_mut(fallback) {
            list.add_change(change);
        }
    }

    pub fn add_locally_deleted(&mut self, file: &FilePath) {
        self.locally_deleted
            .insert(file.path.clone(), file.is_directory);
    }

    pub fn add_switched(&mut self, path: &Path, branch: &str, recursive: bool) {
        self.switched.insert(
            path.to_path_buf(),
            SwitchedEntry {
                branch: branch.to_string(),
                recursive,
            },
        );
    }

    /// Begin processing a scope (every path without one)
    ///
    /// Withdraws the changes the scope covers and returns them. Moves among
    /// them widen the scope with both of their sides, so a move is
    /// re-evaluated as a whole.
    pub fn notify_start_processing(&mut self, mut scope: Option<&mut DirtyScope>) -> Vec<Change> {
        let mut withdrawn = Vec::new();
        for list in &mut self.lists {
            withdrawn.extend(list.start_processing(scope.as_deref()));
        }

        match scope.as_deref_mut() {
            Some(scope) => {
                for change in &withdrawn {
                    if change.is_moved() || change.is_renamed() {
                        for revision in [&change.before, &change.after].into_iter().flatten() {
                            scope.add_dirty_file(&revision.file);
                        }
                    }
                }
                self.locally_deleted.retain(|path, _| !scope.belongs_to(path));
                self.switched.retain(|path, _| !scope.belongs_to(path));
            }
            None => {
                self.locally_deleted.clear();
                self.switched.clear();
            }
        }

        self.rebuild_index();
        withdrawn
    }

    /// Finish processing, producing list-content events
    pub fn notify_done_processing(&mut self) -> Vec<ChangeListEvent> {
        let mut removed = Vec::new();
        let mut added = Vec::new();
        let mut changed = Vec::new();

        for list in &mut self.lists {
            let delta = list.done_processing();
            let name = list.name().to_string();
            if !delta.removed.is_empty() {
                removed.push(ChangeListEvent::ChangesRemoved {
                    list: name.clone(),
                    changes: delta.removed,
                });
            }
            if !delta.added.is_empty() {
                added.push(ChangeListEvent::ChangesAdded {
                    list: name.clone(),
                    changes: delta.added,
                });
            }
            if delta.changed {
                changed.push(ChangeListEvent::ListChanged { name });
            }
        }

        removed.into_iter().chain(added).chain(changed).collect()
    }

    /// Fix up a freshly swapped-in model against the one it replaced
    ///
    /// When several moves share a source path only the last (by target path)
    /// stays a move; the others become additions. Returns every path whose
    /// status differs from `previous`.
    pub fn on_after_worker_switch(&mut self, previous: &ChangeListWorker) -> Vec<PathBuf> {
        let mut moves: BTreeMap<PathBuf, SmallVec<[(usize, ChangeKey, PathBuf); 2]>> = BTreeMap::new();
        for (i, list) in self.lists.iter().enumerate() {
            for change in list.changes() {
                if let (Some(before), Some(after)) = (&change.before, &change.after) {
                    if change.is_moved() || change.is_renamed() {
                        moves.entry(before.path().to_path_buf()).or_default().push((
                            i,
                            change.key(),
                            after.path().to_path_buf(),
                        ));
                    }
                }
            }
        }

        let mut fixed = 0;
        for (source, mut copies) in moves {
            if copies.len() < 2 {
                continue;
            }
            copies.sort_by(|a, b| a.2.cmp(&b.2));
            copies.pop();
            for (list, key, _) in copies {
                if let Some(change) = self.lists[list].remove_change(&key) {
                    let addition = Change::new(None, change.after.clone());
                    self.lists[list].add_change(addition);
                    fixed += 1;
                }
            }
            debug!("Multiple moves from {}, kept one", source.display());
        }
        if fixed > 0 {
            self.rebuild_index();
        }

        let paths: BTreeSet<&PathBuf> = self.index.keys().chain(previous.index.keys()).collect();
        paths
            .into_iter()
            .filter(|path| self.index.get(*path) != previous.index.get(*path))
            .cloned()
            .collect()
    }

    /// Restore a change from persisted state as a placeholder
    pub(crate) fn restore_change(&mut self, list: usize, before: Option<FilePath>, after: Option<FilePath>) {
        if before.is_none() && after.is_none() {
            return;
        }
        let change = Change::new(
            before.map(ContentRevision::placeholder),
            after.map(ContentRevision::placeholder),
        );
        if self.lists.iter().any(|l| l.contains(&change.key())) {
            return;
        }
        if let Some(target) = self.lists.get_mut(list) {
            self.index
                .insert(change.path().to_path_buf(), change.file_status());
            target.add_change(change);
        }
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.lists
            .iter()
            .position(|list| list.name() == name)
            .ok_or_else(|| ModelError::NoSuchList(name.to_string()))
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .lists
            .iter()
            .flat_map(|list| list.changes())
            .map(|change| (change.path().to_path_buf(), change.file_status()))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcsync_core::{VcsKey, VcsRoot};
    use vcsync_dirty::DirtyMarkSet;

    fn worker() -> ChangeListWorker {
        ChangeListWorker::new("Default")
    }

    fn scope(files: &[&str]) -> DirtyScope {
        let mut marks = DirtyMarkSet::new(VcsRoot::new("/repo", VcsKey::new("git")));
        for file in files {
            marks.add_file(&FilePath::file(*file));
        }
        DirtyScope::new(marks, false, Vec::new())
    }

    fn modified(path: &str) -> Change {
        Change::modified(FilePath::file(path), "1")
    }

    #[test]
    fn test_new_worker_has_one_default_list() {
        let worker = worker();
        assert_eq!(worker.list_count(), 1);
        assert_eq!(worker.default_list().unwrap().name(), "Default");
    }

    #[test]
    fn test_list_mutations() {
        let mut worker = worker();
        worker.add_change_list(Uuid::new_v4(), "feature", Some("wip")).unwrap();
        assert!(matches!(
            worker.add_change_list(Uuid::new_v4(), "feature", None),
            Err(ModelError::DuplicateList(_))
        ));

        let events = worker.edit_name("feature", "feature-2").unwrap();
        assert_eq!(
            events,
            vec![ChangeListEvent::ListRenamed {
                from: "feature".to_string(),
                to: "feature-2".to_string()
            }]
        );
        assert_eq!(worker.find_list("feature-2").unwrap().comment(), "wip");

        worker.set_read_only("feature-2", true).unwrap();
        assert!(matches!(
            worker.edit_name("feature-2", "other"),
            Err(ModelError::ReadOnly(_))
        ));

        assert!(matches!(
            worker.remove_change_list("Default"),
            Err(ModelError::CannotRemoveDefault(_))
        ));
        assert!(matches!(
            worker.edit_comment("missing", "x"),
            Err(ModelError::NoSuchList(_))
        ));
    }

    #[test]
    fn test_set_default() {
        let mut worker = worker();
        worker.add_change_list(Uuid::new_v4(), "feature", None).unwrap();

        let events = worker.set_default("feature").unwrap();
        assert_eq!(
            events,
            vec![ChangeListEvent::DefaultListChanged {
                from: Some("Default".to_string()),
                to: "feature".to_string()
            }]
        );
        assert_eq!(worker.default_list().unwrap().name(), "feature");
        assert!(worker.set_default("feature").unwrap().is_empty());
        assert_eq!(worker.lists().iter().filter(|l| l.is_default()).count(), 1);
    }

    #[test]
    fn test_remove_list_moves_changes_to_default() {
        let mut worker = worker();
        worker.add_change_list(Uuid::new_v4(), "feature", None).unwrap();
        assert!(worker.add_change_to_list("feature", modified("/repo/a.txt")));

        let events = worker.remove_change_list("feature").unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ChangeListEvent::ChangesMoved { to, .. } if to == "Default"));
        assert_eq!(
            worker.list_for_path(Path::new("/repo/a.txt")).unwrap().name(),
            "Default"
        );
    }

    #[test]
    fn test_move_changes_groups_by_source() {
        let mut worker = worker();
        worker.add_change_list(Uuid::new_v4(), "feature", None).unwrap();
        let a = modified("/repo/a.txt");
        let b = modified("/repo/b.txt");
        worker.add_change_to_list("Default", a.clone());
        worker.add_change_to_list("Default", b.clone());

        let events = worker
            .move_changes_to("feature", &[a.key(), b.key()])
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(
            matches!(&events[0], ChangeListEvent::ChangesMoved { from, changes, .. } if from == "Default" && changes.len() == 2)
        );
        assert_eq!(worker.find_list("feature").unwrap().len(), 2);
        assert!(worker.find_list("Default").unwrap().is_empty());
    }

    #[test]
    fn test_corresponding_list_survives_rescan() {
        let mut worker = worker();
        worker.add_change_list(Uuid::new_v4(), "feature", None).unwrap();
        worker.add_change_to_list("feature", modified("/repo/a.txt"));

        let mut scope = scope(&["/repo/a.txt", "/repo/b.txt"]);
        let withdrawn = worker.notify_start_processing(Some(&mut scope));
        assert_eq!(withdrawn.len(), 1);
        assert_eq!(worker.status(Path::new("/repo/a.txt")), FileStatus::NotChanged);

        // Rebuilt values with the same identity
        worker.add_change_to_corresponding_list(Change::modified(FilePath::file("/repo/a.txt"), "2"));
        worker.add_change_to_corresponding_list(modified("/repo/b.txt"));
        let events = worker.notify_done_processing();

        assert_eq!(
            worker.list_for_path(Path::new("/repo/a.txt")).unwrap().name(),
            "feature"
        );
        assert_eq!(
            worker.list_for_path(Path::new("/repo/b.txt")).unwrap().name(),
            "Default"
        );
        assert_eq!(worker.status(Path::new("/repo/b.txt")), FileStatus::Modified);
        assert!(events.contains(&ChangeListEvent::ChangesAdded {
            list: "Default".to_string(),
            changes: vec![modified("/repo/b.txt")]
        }));
    }

    #[test]
    fn test_start_processing_widens_scope_for_moves() {
        let mut worker = worker();
        let moved = Change::moved(
            FilePath::file("/repo/old.txt"),
            FilePath::file("/repo/sub/new.txt"),
            "3",
        );
        worker.add_change_to_list("Default", moved);
        worker.add_locally_deleted(&FilePath::file("/repo/sub/new.txt"));

        let mut scope = scope(&["/repo/old.txt"]);
        worker.notify_start_processing(Some(&mut scope));

        assert!(scope.belongs_to(Path::new("/repo/sub/new.txt")));
        assert!(!worker.is_locally_deleted(Path::new("/repo/sub/new.txt")));
    }

    #[test]
    fn test_worker_switch_keeps_one_move_per_source() {
        let previous = worker();
        let mut worker = worker();
        worker.add_change_list(Uuid::new_v4(), "feature", None).unwrap();
        worker.add_change_to_list(
            "Default",
            Change::moved(FilePath::file("/repo/a.txt"), FilePath::file("/repo/x/a.txt"), "1"),
        );
        worker.add_change_to_list(
            "feature",
            Change::moved(FilePath::file("/repo/a.txt"), FilePath::file("/repo/y/a.txt"), "1"),
        );

        let changed = worker.on_after_worker_switch(&previous);

        let copy = worker.change_for_path(Path::new("/repo/x/a.txt")).unwrap();
        assert!(copy.before.is_none());
        let kept = worker.change_for_path(Path::new("/repo/y/a.txt")).unwrap();
        assert!(kept.is_moved());
        assert_eq!(
            changed,
            vec![PathBuf::from("/repo/x/a.txt"), PathBuf::from("/repo/y/a.txt")]
        );
    }

    #[test]
    fn test_switched_and_queries() {
        let mut worker = worker();
        worker.add_switched(Path::new("/repo/lib"), "release", true);
        worker.add_switched(Path::new("/repo/doc"), "main", false);
        worker.add_change_to_list("Default", modified("/repo/src/a.rs"));

        assert_eq!(worker.switched_branch(Path::new("/repo/lib/x.rs")), Some("release"));
        assert_eq!(worker.switched_branch(Path::new("/repo/doc/x.md")), None);
        assert_eq!(worker.status(Path::new("/repo/lib/x.rs")), FileStatus::Switched);

        assert!(worker.have_changes_under(Path::new("/repo/src")));
        assert!(!worker.have_changes_under(Path::new("/repo/lib")));
        assert_eq!(worker.changes_in(Path::new("/repo")).len(), 1);
        assert_eq!(worker.affected_paths(), vec![PathBuf::from("/repo/src/a.rs")]);
    }

    #[test]
    fn test_clone_is_independent() {
        let original = worker();
        let mut clone = original.clone();
        clone.add_change_to_list("Default", modified("/repo/a.txt"));

        assert_eq!(original.all_changes().count(), 0);
        assert_ne!(original, clone);
    }
}
