//! Builder that feeds provider reports into the scratch model

use crate::provider::ChangelistBuilder;
use tracing::trace;
use vcsync_core::{Change, FilePath, IgnoredFileRules};
use vcsync_dirty::DirtyScope;
use vcsync_model::{ChangeListWorker, FileHolderComposite, HolderKind};

/// Routes one scope's reports into a pass's scratch worker and composite
///
/// Reports outside the scope are dropped. Unversioned files that match the
/// ignored-file rules go straight to the ignored category.
pub struct UpdatingChangeListBuilder<'a> {
    worker: &'a mut ChangeListWorker,
    composite: &'a mut FileHolderComposite,
    scope: &'a DirtyScope,
    ignored: &'a IgnoredFileRules,
    additional_info: Option<String>,
    rejected: usize,
}

impl<'a> UpdatingChangeListBuilder<'a> {
    pub fn new(
        worker: &'a mut ChangeListWorker,
        composite: &'a mut FileHolderComposite,
        scope: &'a DirtyScope,
        ignored: &'a IgnoredFileRules,
    ) -> Self {
        Self {
            worker,
            composite,
            scope,
            ignored,
            additional_info: None,
            rejected: 0,
        }
    }

    /// Diagnostic text reported during this scope, if any
    pub fn take_additional_info(&mut self) -> Option<String> {
        self.additional_info.take()
    }

    /// Number of reports dropped for lying outside the scope
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    fn accepts(&mut self, file: &FilePath) -> bool {
        if self.scope.belongs_to(&file.path) {
            return true;
        }
        trace!("Rejecting {} outside scope {}", file.path.display(), self.scope.root());
        self.rejected += 1;
        false
    }

    fn add_to_holder(&mut self, kind: HolderKind, file: &FilePath) {
        if self.accepts(file) {
            self.composite.add(kind, file);
        }
    }
}

impl ChangelistBuilder for UpdatingChangeListBuilder<'_> {
    fn process_change(&mut self, change: Change, list_hint: Option<&str>) {
        if !self.scope.affects_change(&change) {
            trace!("Rejecting change {} outside scope {}", change.path().display(), self.scope.root());
            self.rejected += 1;
            return;
        }

        match list_hint {
            Some(name) => {
                if !self.worker.add_change_to_list(name, change.clone()) {
                    trace!("No list named {}, using the corresponding list", name);
                    self.worker.add_change_to_corresponding_list(change);
                }
            }
            None => self.worker.add_change_to_corresponding_list(change),
        }
    }

    fn process_unversioned_file(&mut self, file: &FilePath) {
        let kind = if self.ignored.is_ignored(&file.path, file.is_directory) {
            HolderKind::Ignored
        } else {
            HolderKind::Unversioned
        };
        self.add_to_holder(kind, file);
    }

    fn process_ignored_file(&mut self, file: &FilePath) {
        self.add_to_holder(HolderKind::Ignored, file);
    }

    fn process_locally_deleted_file(&mut self, file: &FilePath) {
        if self.accepts(file) {
            self.worker.add_locally_deleted(file);
        }
    }

    fn process_modified_without_checkout(&mut self, file: &FilePath) {
        self.add_to_holder(HolderKind::ModifiedWithoutCheckout, file);
    }

    fn process_locked_folder(&mut self, file: &FilePath) {
        self.add_to_holder(HolderKind::Locked, file);
    }

    fn process_logically_locked_folder(&mut self, file: &FilePath) {
        self.add_to_holder(HolderKind::LogicallyLocked, file);
    }

    fn process_switched_file(&mut self, file: &FilePath, branch: &str, recursive: bool) {
        if self.accepts(file) {
            self.worker.add_switched(&file.path, branch, recursive);
        }
    }

    fn report_additional_info(&mut self, text: &str) {
        if self.additional_info.is_none() && !text.is_empty() {
            self.additional_info = Some(text.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use vcsync_core::{FileStatus, IgnoreRule, VcsKey, VcsRoot};
    use vcsync_dirty::DirtyMarkSet;

    fn scope_for(dir: &str) -> DirtyScope {
        let root = VcsRoot::new("/repo", VcsKey::new("git"));
        let mut marks = DirtyMarkSet::new(root);
        marks.add_dir_recursive(Path::new(dir));
        DirtyScope::new(marks, false, Vec::new())
    }

    #[test]
    fn test_reports_outside_scope_are_rejected() {
        let mut worker = ChangeListWorker::new("Default");
        let mut composite = FileHolderComposite::new();
        let scope = scope_for("/repo/src");
        let rules = IgnoredFileRules::new("/repo");

        let mut builder = UpdatingChangeListBuilder::new(&mut worker, &mut composite, &scope, &rules);
        builder.process_change(Change::modified(FilePath::file("/repo/src/lib.rs"), "1"), None);
        builder.process_change(Change::modified(FilePath::file("/repo/docs/a.md"), "1"), None);
        builder.process_unversioned_file(&FilePath::file("/repo/other.txt"));
        builder.process_locally_deleted_file(&FilePath::file("/repo/gone.rs"));
        assert_eq!(builder.rejected(), 3);

        assert_eq!(worker.status(Path::new("/repo/src/lib.rs")), FileStatus::Modified);
        assert!(worker.change_for_path(Path::new("/repo/docs/a.md")).is_none());
        assert!(composite.kind_of(Path::new("/repo/other.txt")).is_none());
    }

    #[test]
    fn test_list_hint_and_fallback() {
        let mut worker = ChangeListWorker::new("Default");
        worker
            .add_change_list(uuid::Uuid::new_v4(), "feature", None)
            .unwrap();
        let mut composite = FileHolderComposite::new();
        let scope = scope_for("/repo");
        let rules = IgnoredFileRules::new("/repo");

        let mut builder = UpdatingChangeListBuilder::new(&mut worker, &mut composite, &scope, &rules);
        builder.process_change(Change::added(FilePath::file("/repo/a.rs"), "1"), Some("feature"));
        builder.process_change(Change::added(FilePath::file("/repo/b.rs"), "1"), Some("missing"));

        assert_eq!(worker.list_for_path(Path::new("/repo/a.rs")).unwrap().name(), "feature");
        assert_eq!(worker.list_for_path(Path::new("/repo/b.rs")).unwrap().name(), "Default");
    }

    #[test]
    fn test_unversioned_matching_rules_is_ignored() {
        let mut worker = ChangeListWorker::new("Default");
        let mut composite = FileHolderComposite::new();
        let scope = scope_for("/repo");
        let mut rules = IgnoredFileRules::new("/repo");
        rules.add([IgnoreRule::Mask("*.log".to_string())]).unwrap();

        let mut builder = UpdatingChangeListBuilder::new(&mut worker, &mut composite, &scope, &rules);
        builder.process_unversioned_file(&FilePath::file("/repo/build.log"));
        builder.process_unversioned_file(&FilePath::file("/repo/notes.txt"));
        builder.process_switched_file(&FilePath::dir("/repo/vendor"), "release", true);
        builder.report_additional_info("");
        builder.report_additional_info("index is stale");
        builder.report_additional_info("second banner");
        assert_eq!(builder.take_additional_info().as_deref(), Some("index is stale"));

        assert_eq!(composite.kind_of(Path::new("/repo/build.log")), Some(HolderKind::Ignored));
        assert_eq!(composite.kind_of(Path::new("/repo/notes.txt")), Some(HolderKind::Unversioned));
        assert_eq!(worker.switched_branch(Path::new("/repo/vendor")), Some("release"));
    }
}
