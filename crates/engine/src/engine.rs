//! One reconciliation pass: clone, scan, then swap or discard
//!
//! The pass claims the dirty batch, clones the authoritative model under the
//! data lock, and scans every scope against the clone with the lock released.
//! A fully successful scan replays the user mutations made meanwhile onto the
//! clone and swaps it in. A failed or cancelled scan discards the clone.

use crate::builder::UpdatingChangeListBuilder;
use crate::notify::Notifier;
use crate::provider::ProviderRegistry;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};
use vcsync_core::{IgnoredFileRules, ProgressHandle, RootResolver, ScanError, VcsError};
use vcsync_dirty::{DirtyScope, DirtyScopeTracker, Invalidated, UpdateDelegate};
use vcsync_model::{ChangeListEvent, ChangeListWorker, FileHolderComposite, Modifier};

/// Where the engine is in its pass cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Scanning,
    Committing,
    Aborting,
}

/// Result of the scan step of a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    Cancelled,
    Failed(VcsError),
}

/// Authoritative state guarded by the data lock
pub(crate) struct ModelData {
    pub worker: ChangeListWorker,
    pub composite: FileHolderComposite,
    pub modifier: Modifier,
    pub ignored: IgnoredFileRules,
    pub update_error: Option<VcsError>,
    pub additional_info: Option<String>,
}

impl ModelData {
    pub fn new(worker: ChangeListWorker, ignored: IgnoredFileRules) -> Self {
        Self {
            worker,
            composite: FileHolderComposite::new(),
            modifier: Modifier::new(),
            ignored,
            update_error: None,
            additional_info: None,
        }
    }
}

/// Releases the claimed batch however the pass ends
struct ProcessedGuard<'a>(&'a DirtyScopeTracker);

impl Drop for ProcessedGuard<'_> {
    fn drop(&mut self) {
        self.0.changes_processed();
    }
}

/// Runs reconciliation passes on behalf of the update scheduler
pub struct ReconciliationEngine {
    tracker: Arc<DirtyScopeTracker>,
    resolver: Arc<dyn RootResolver>,
    providers: Arc<ProviderRegistry>,
    data: Arc<Mutex<ModelData>>,
    notifier: Arc<Notifier>,
    phase: Mutex<EnginePhase>,
    progress: Mutex<Option<ProgressHandle>>,
    last_outcome: Mutex<Option<PassOutcome>>,
    stopped: AtomicBool,
    passes: AtomicU64,
}

impl ReconciliationEngine {
    pub(crate) fn new(
        tracker: Arc<DirtyScopeTracker>,
        resolver: Arc<dyn RootResolver>,
        providers: Arc<ProviderRegistry>,
        data: Arc<Mutex<ModelData>>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            tracker,
            resolver,
            providers,
            data,
            notifier,
            phase: Mutex::new(EnginePhase::Idle),
            progress: Mutex::new(None),
            last_outcome: Mutex::new(None),
            stopped: AtomicBool::new(false),
            passes: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> EnginePhase {
        *self.phase.lock()
    }

    /// Number of passes that scanned at least one scope or a full batch
    pub fn pass_count(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    pub fn last_outcome(&self) -> Option<PassOutcome> {
        self.last_outcome.lock().clone()
    }

    /// Cancel the running pass, if any
    pub fn cancel(&self) -> bool {
        match self.progress.lock().as_ref() {
            Some(progress) => {
                progress.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the running pass and refuse to start scopes from now on
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: EnginePhase) {
        *self.phase.lock() = phase;
    }

    fn reconcile(&self, batch: &Invalidated) -> PassOutcome {
        let progress = ProgressHandle::new();
        *self.progress.lock() = Some(progress.clone());
        self.set_phase(EnginePhase::Scanning);

        let (mut worker, mut composite, ignored) = {
            let mut data = self.data.lock();
            data.modifier.enter_update();
            (data.worker.clone(), data.composite.clone(), data.ignored.clone())
        };
        info!(
            "Update started (everything dirty: {}, {} scopes)",
            batch.everything_dirty,
            batch.scopes.len()
        );

        let mut events = Vec::new();
        let mut additional_info = None;
        if batch.everything_dirty {
            worker.notify_start_processing(None);
            composite.clean_all();
        }

        let mut scopes = batch.scopes.clone();
        let outcome = self.scan(
            &mut scopes,
            batch.everything_dirty,
            &mut worker,
            &mut composite,
            &ignored,
            &progress,
            &mut events,
            &mut additional_info,
        );
        if batch.everything_dirty {
            events.extend(worker.notify_done_processing());
        }

        match &outcome {
            PassOutcome::Completed => {
                self.commit(worker, composite, events, additional_info, batch.everything_dirty)
            }
            PassOutcome::Cancelled => {
                self.set_phase(EnginePhase::Aborting);
                self.data.lock().modifier.finish_update(None);
                self.tracker.restore(batch.clone());
                debug!("Update cancelled, dirt handed back");
            }
            PassOutcome::Failed(e) => {
                self.set_phase(EnginePhase::Aborting);
                let mut data = self.data.lock();
                data.modifier.finish_update(None);
                data.update_error = Some(e.clone());
                self.notifier
                    .publish(ChangeListEvent::UpdateFailed { error: e.clone() });
            }
        }

        *self.progress.lock() = None;
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn scan(
        &self,
        scopes: &mut [DirtyScope],
        everything_dirty: bool,
        worker: &mut ChangeListWorker,
        composite: &mut FileHolderComposite,
        ignored: &IgnoredFileRules,
        progress: &ProgressHandle,
        events: &mut Vec<ChangeListEvent>,
        additional_info: &mut Option<String>,
    ) -> PassOutcome {
        for scope in scopes.iter_mut() {
            if progress.is_cancelled() || self.is_stopped() {
                return PassOutcome::Cancelled;
            }

            let Some(provider) = self.providers.get(&scope.root().vcs) else {
                debug!("No change provider for {}, skipping", scope.root());
                continue;
            };

            if !everything_dirty {
                worker.notify_start_processing(Some(&mut *scope));
                composite.clean_and_adjust_scope(scope);
            }

            let scope: &DirtyScope = scope;
            let result = {
                let mut builder = UpdatingChangeListBuilder::new(worker, composite, scope, ignored);
                let result = catch_unwind(AssertUnwindSafe(|| {
                    provider.get_changes(scope, &mut builder, progress)
                }));
                if additional_info.is_none() {
                    *additional_info = builder.take_additional_info();
                }
                result
            };
            let result = result.unwrap_or_else(|_| {
                error!("Change provider for {} panicked", scope.root());
                Err(ScanError::Vcs(VcsError::Internal(format!(
                    "change provider for {} panicked",
                    scope.root()
                ))))
            });

            if !everything_dirty {
                events.extend(worker.notify_done_processing());
            }

            match result {
                Ok(()) => {}
                Err(ScanError::Cancelled) => return PassOutcome::Cancelled,
                Err(ScanError::Vcs(e)) => {
                    info!("Update of {} failed: {}", scope.root(), e);
                    return PassOutcome::Failed(e);
                }
            }
        }

        if progress.is_cancelled() {
            return PassOutcome::Cancelled;
        }
        PassOutcome::Completed
    }

    fn commit(
        &self,
        mut worker: ChangeListWorker,
        mut composite: FileHolderComposite,
        events: Vec<ChangeListEvent>,
        additional_info: Option<String>,
        everything_dirty: bool,
    ) {
        let mut data = self.data.lock();
        self.set_phase(EnginePhase::Committing);

        let replayed = data.modifier.finish_update(Some(&mut worker));
        let exchanged = composite.exchange_with_ignored(&data.ignored);

        let previous = std::mem::replace(&mut data.worker, worker);
        let changed_paths = data.worker.on_after_worker_switch(&previous);
        let categories_changed = data.composite != composite;
        data.composite = composite;
        data.update_error = None;
        if everything_dirty || additional_info.is_some() {
            data.additional_info = additional_info;
        }

        debug!(
            "Update committed: {} changes in {} lists, {} paths changed status, {} mutations replayed, {} paths ignored",
            data.worker.all_changes().count(),
            data.worker.list_count(),
            changed_paths.len(),
            replayed,
            exchanged
        );

        self.notifier.publish_all(events);
        if !changed_paths.is_empty() {
            self.notifier.publish(ChangeListEvent::FileStatusesChanged {
                paths: changed_paths,
            });
        }
        if categories_changed {
            self.notifier.publish(ChangeListEvent::UnchangedFileStatusChanged);
        }
    }

    fn abandon_after_panic(&self) {
        let mut data = self.data.lock();
        if data.modifier.is_in_update() {
            data.modifier.finish_update(None);
        }
        *self.progress.lock() = None;
    }
}

impl UpdateDelegate for ReconciliationEngine {
    fn run_update(&self) {
        let Some(batch) = self.tracker.retrieve_scopes() else {
            return;
        };
        let _processed = ProcessedGuard(&self.tracker);

        if self.resolver.roots().is_empty() {
            debug!("No version-control roots, nothing to update");
            return;
        }
        if batch.is_empty() {
            debug!("Dirty batch is empty, nothing to update");
            return;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| self.reconcile(&batch)));
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Update pass panicked, keeping the previous model");
                self.abandon_after_panic();
                PassOutcome::Failed(VcsError::Internal("update pass panicked".to_string()))
            }
        };

        {
            let _data = self.data.lock();
            self.notifier.publish(ChangeListEvent::UpdateDone);
            *self.last_outcome.lock() = Some(outcome);
            self.passes.fetch_add(1, Ordering::SeqCst);
        }
        self.set_phase(EnginePhase::Idle);
    }
}
