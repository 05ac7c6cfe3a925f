//! Root-keyed accumulation of dirty marks
//!
//! Marks accumulate per version-control root until the reconciliation pass
//! claims them with [`DirtyScopeTracker::retrieve_scopes`]. The claimed batch
//! stays visible to [`DirtyScopeTracker::what_files_dirty`] until the pass
//! reports back through [`DirtyScopeTracker::changes_processed`].

use crate::marks::DirtyMarkSet;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};
use vcsync_core::{Change, FilePath, RootResolver, VcsRoot};

/// Receives "something became dirty" notifications
pub trait UpdateTrigger: Send + Sync {
    fn schedule(&self);
}

/// Dirty marks of one root, ready for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyScope {
    marks: DirtyMarkSet,
    was_everything_dirty: bool,
    /// Roots nested under this one; their paths belong to their own scopes
    nested_roots: Vec<PathBuf>,
}

impl DirtyScope {
    /// Create a scope from accumulated marks
    pub fn new(marks: DirtyMarkSet, was_everything_dirty: bool, nested_roots: Vec<PathBuf>) -> Self {
        Self {
            marks,
            was_everything_dirty,
            nested_roots,
        }
    }

    /// Scope covering the whole root
    pub fn whole_root(root: VcsRoot, nested_roots: Vec<PathBuf>) -> Self {
        let mut marks = DirtyMarkSet::new(root.clone());
        marks.add_dir_recursive(&root.path);
        Self::new(marks, true, nested_roots)
    }

    pub fn root(&self) -> &VcsRoot {
        self.marks.root()
    }

    pub fn marks(&self) -> &DirtyMarkSet {
        &self.marks
    }

    /// Whether this scope was produced by an everything-dirty request
    pub fn was_everything_dirty(&self) -> bool {
        self.was_everything_dirty
    }

    /// Check if a report about `path` falls inside this scope
    pub fn belongs_to(&self, path: &Path) -> bool {
        if !self.root().contains(path) {
            return false;
        }
        if self.nested_roots.iter().any(|nested| path.starts_with(nested)) {
            return false;
        }
        self.marks.contains(path)
    }

    /// Check if either side of `change` falls inside this scope
    pub fn affects_change(&self, change: &Change) -> bool {
        change.before.as_ref().is_some_and(|r| self.belongs_to(r.path()))
            || change.after.as_ref().is_some_and(|r| self.belongs_to(r.path()))
    }

    /// Widen the scope with `file` (no-op outside the root)
    pub fn add_dirty_file(&mut self, file: &FilePath) -> bool {
        if !self.root().contains(&file.path) {
            return false;
        }
        self.marks.add_file(file)
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

/// A point-in-time batch of dirty scopes, claimed by one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidated {
    /// Per-root scopes, ordered by root path
    pub scopes: Vec<DirtyScope>,
    /// Whether the batch came from an everything-dirty request
    pub everything_dirty: bool,
}

impl Invalidated {
    /// Check if the batch carries no work
    pub fn is_empty(&self) -> bool {
        !self.everything_dirty && self.scopes.iter().all(DirtyScope::is_empty)
    }

    /// Check if `path` is covered by this batch
    pub fn is_file_dirty(&self, path: &Path) -> bool {
        self.everything_dirty || self.scopes.iter().any(|scope| scope.belongs_to(path))
    }
}

#[derive(Default)]
struct TrackerState {
    ready: bool,
    everything_dirty: bool,
    dirt: AHashMap<VcsRoot, DirtyMarkSet>,
    in_progress: Option<Invalidated>,
}

/// Process-wide (per project) dirty-mark accumulator
pub struct DirtyScopeTracker {
    resolver: Arc<dyn RootResolver>,
    trigger: Arc<dyn UpdateTrigger>,
    state: Mutex<TrackerState>,
}

impl DirtyScopeTracker {
    /// Create a tracker that is not ready yet
    ///
    /// Marks are ignored until [`set_ready`](Self::set_ready); startup ends
    /// with a full scan anyway.
    pub fn new(resolver: Arc<dyn RootResolver>, trigger: Arc<dyn UpdateTrigger>) -> Self {
        Self {
            resolver,
            trigger,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Accept marks from now on and request the startup full scan
    pub fn set_ready(&self) {
        self.state.lock().ready = true;
        self.mark_everything_dirty();
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Mark every root dirty
    pub fn mark_everything_dirty(&self) {
        {
            let mut state = self.state.lock();
            if !state.ready {
                trace!("Tracker not ready, ignoring everything-dirty request");
                return;
            }
            state.everything_dirty = true;
            state.dirt.clear();
        }
        info!("Everything marked dirty");
        self.trigger.schedule();
    }

    /// Mark a single file (or a directory's entries) dirty
    pub fn file_dirty(&self, file: &FilePath) {
        self.files_dirty(std::iter::once(file.clone()), std::iter::empty());
    }

    /// Mark a directory subtree dirty
    pub fn dir_dirty_recursively(&self, dir: &Path) {
        self.files_dirty(std::iter::empty(), std::iter::once(dir.to_path_buf()));
    }

    /// Mark files and directory subtrees dirty with a single schedule request
    pub fn files_dirty(
        &self,
        files: impl IntoIterator<Item = FilePath>,
        dirs: impl IntoIterator<Item = PathBuf>,
    ) {
        let files: Vec<(VcsRoot, FilePath)> = files
            .into_iter()
            .filter_map(|file| Some((self.resolver.resolve_root(&file.path)?, file)))
            .collect();
        let dirs: Vec<(VcsRoot, PathBuf)> = dirs
            .into_iter()
            .filter_map(|dir| Some((self.resolver.resolve_root(&dir)?, dir)))
            .collect();
        if files.is_empty() && dirs.is_empty() {
            return;
        }

        let added = {
            let mut state = self.state.lock();
            if !state.ready || state.everything_dirty {
                return;
            }

            let mut added = false;
            for (root, dir) in dirs {
                added |= state
                    .dirt
                    .entry(root.clone())
                    .or_insert_with(|| DirtyMarkSet::new(root))
                    .add_dir_recursive(&dir);
            }
            for (root, file) in files {
                added |= state
                    .dirt
                    .entry(root.clone())
                    .or_insert_with(|| DirtyMarkSet::new(root))
                    .add_file(&file);
            }
            added
        };

        if added {
            self.trigger.schedule();
        }
    }

    /// Claim the accumulated marks for processing
    ///
    /// Returns `None` if the previous batch has not been released with
    /// [`changes_processed`](Self::changes_processed) yet.
    pub fn retrieve_scopes(&self) -> Option<Invalidated> {
        let roots = self.resolver.roots();
        let mut state = self.state.lock();

        if state.in_progress.is_some() {
            error!("Dirty scopes retrieved again before the previous batch was processed");
            return None;
        }

        let everything_dirty = std::mem::take(&mut state.everything_dirty);
        let dirt = std::mem::take(&mut state.dirt);

        let mut scopes: Vec<DirtyScope> = if everything_dirty {
            roots
                .iter()
                .map(|root| DirtyScope::whole_root(root.clone(), nested_roots(root, &roots)))
                .collect()
        } else {
            dirt.into_iter()
                .filter(|(root, marks)| {
                    let known = roots.contains(root);
                    if !known {
                        debug!("Dropping {} marks of unregistered root {}", marks.len(), root);
                    }
                    known && !marks.is_empty()
                })
                .map(|(root, marks)| DirtyScope::new(marks, false, nested_roots(&root, &roots)))
                .collect()
        };
        scopes.sort_by(|a, b| a.root().cmp(b.root()));

        let batch = Invalidated {
            scopes,
            everything_dirty,
        };
        state.in_progress = Some(batch.clone());
        Some(batch)
    }

    /// Release the batch claimed by the last `retrieve_scopes`
    pub fn changes_processed(&self) {
        if self.state.lock().in_progress.take().is_none() {
            warn!("Changes processed without a batch in progress");
        }
    }

    /// Hand a claimed batch back after an aborted pass
    ///
    /// Does not issue a schedule request.
    pub fn restore(&self, batch: Invalidated) {
        let mut state = self.state.lock();
        if state.everything_dirty {
            return;
        }
        if batch.everything_dirty {
            state.everything_dirty = true;
            state.dirt.clear();
            return;
        }
        for scope in batch.scopes {
            let root = scope.root().clone();
            state
                .dirt
                .entry(root.clone())
                .or_insert_with(|| DirtyMarkSet::new(root))
                .merge(scope.marks());
        }
    }

    /// For each candidate, whether it is queued or in flight
    pub fn what_files_dirty(&self, candidates: &[PathBuf]) -> Vec<bool> {
        let resolved: Vec<Option<VcsRoot>> = candidates
            .iter()
            .map(|path| self.resolver.resolve_root(path))
            .collect();

        let state = self.state.lock();
        candidates
            .iter()
            .zip(resolved)
            .map(|(path, root)| {
                let Some(root) = root else {
                    return false;
                };
                let queued = state.everything_dirty
                    || state.dirt.get(&root).is_some_and(|marks| marks.contains(path));
                queued
                    || state
                        .in_progress
                        .as_ref()
                        .is_some_and(|batch| batch.is_file_dirty(path))
            })
            .collect()
    }

    /// Check if a batch is claimed and not yet processed
    pub fn is_in_progress(&self) -> bool {
        self.state.lock().in_progress.is_some()
    }

    /// Check if anything is queued for the next pass
    pub fn has_pending_dirt(&self) -> bool {
        let state = self.state.lock();
        state.everything_dirty || state.dirt.values().any(|marks| !marks.is_empty())
    }
}

fn nested_roots(root: &VcsRoot, roots: &[VcsRoot]) -> Vec<PathBuf> {
    roots
        .iter()
        .filter(|other| other.path != root.path && other.path.starts_with(&root.path))
        .map(|other| other.path.clone())
        .collect()
}
