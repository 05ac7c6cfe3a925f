//! Per-project facade over tracker, scheduler, engine and notifier
//!
//! Every project owns one [`ChangeListManager`]; nothing is process-global.
//! Reads hand out copies of the authoritative model, mutations go through
//! the modifier so a pass in flight replays them before its swap.

use crate::engine::{EnginePhase, ModelData, PassOutcome, ReconciliationEngine};
use crate::error::{EngineError, Result};
use crate::notify::{ChangeListListener, ListenerId, Notifier};
use crate::provider::{ChangeProvider, ProviderRegistry};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;
use vcsync_core::{
    Change, EngineConfig, FilePath, FileStatus, HeavyOperationSignal, IgnoreRule,
    IgnoredFileRules, ProgressHandle, RootResolver, VcsError, VcsKey,
};
use vcsync_dirty::{DirtyScopeTracker, InvokeMode, UpdateScheduler};
use vcsync_model::{
    ChangeList, ChangeListWorker, FileHolderComposite, HolderKind, ListCommand, PersistedState,
};

/// How long [`ChangeListManager::dispose`] and friends wait for queued events
const NOTIFY_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ChangeListManager {
    config: EngineConfig,
    resolver: Arc<dyn RootResolver>,
    providers: Arc<ProviderRegistry>,
    tracker: Arc<DirtyScopeTracker>,
    scheduler: Arc<UpdateScheduler>,
    engine: Arc<ReconciliationEngine>,
    notifier: Arc<Notifier>,
    data: Arc<Mutex<ModelData>>,
    started: AtomicBool,
    disposed: AtomicBool,
}

impl ChangeListManager {
    /// Wire up a manager for the project at `project_base`
    ///
    /// Nothing runs until [`project_opened`](Self::project_opened).
    pub fn new(
        config: EngineConfig,
        project_base: impl Into<PathBuf>,
        resolver: Arc<dyn RootResolver>,
        heavy: Option<Arc<dyn HeavyOperationSignal>>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Internal(format!("Invalid configuration: {:#}", e)))?;

        let scheduler = Arc::new(UpdateScheduler::new(&config, heavy));
        let tracker = Arc::new(DirtyScopeTracker::new(resolver.clone(), scheduler.clone()));
        let providers = Arc::new(ProviderRegistry::new());
        let notifier = Arc::new(Notifier::start()?);
        let data = Arc::new(Mutex::new(ModelData::new(
            ChangeListWorker::new(&config.default_list_name),
            IgnoredFileRules::new(project_base),
        )));
        let engine = Arc::new(ReconciliationEngine::new(
            tracker.clone(),
            resolver.clone(),
            providers.clone(),
            data.clone(),
            notifier.clone(),
        ));

        Ok(Self {
            config,
            resolver,
            providers,
            tracker,
            scheduler,
            engine,
            notifier,
            data,
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    /// Start the update worker and request the startup full scan
    pub fn project_opened(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.scheduler.start(self.engine.clone())?;
        self.tracker.set_ready();
        info!("Change list manager started ({} roots)", self.resolver.roots().len());
        Ok(())
    }

    /// Stop updating and deliver what is queued
    ///
    /// A running pass is cancelled. Pending after-update callbacks run on
    /// the calling thread.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.engine.stop();
        self.scheduler.stop();
        self.notifier.shutdown();
        info!("Change list manager disposed");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- providers and listeners ----

    /// Register the change provider for `vcs` and rescan everything
    pub fn register_provider(&self, vcs: VcsKey, provider: Arc<dyn ChangeProvider>) {
        if self.providers.register(vcs.clone(), provider).is_some() {
            debug!("Replaced change provider for {}", vcs);
        }
        self.tracker.mark_everything_dirty();
    }

    pub fn unregister_provider(&self, vcs: &VcsKey) -> bool {
        self.providers.unregister(vcs)
    }

    pub fn add_listener(&self, listener: Arc<dyn ChangeListListener>) -> ListenerId {
        self.notifier.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.notifier.remove_listener(id)
    }

    /// Wait until queued events have reached every listener
    pub fn flush_notifications(&self) -> bool {
        self.notifier.flush(NOTIFY_DRAIN_TIMEOUT)
    }

    // ---- dirt ----

    pub fn file_dirty(&self, file: &FilePath) {
        self.tracker.file_dirty(file);
    }

    pub fn dir_dirty_recursively(&self, dir: &Path) {
        self.tracker.dir_dirty_recursively(dir);
    }

    pub fn files_dirty(
        &self,
        files: impl IntoIterator<Item = FilePath>,
        dirs: impl IntoIterator<Item = PathBuf>,
    ) {
        self.tracker.files_dirty(files, dirs);
    }

    pub fn mark_everything_dirty(&self) {
        self.tracker.mark_everything_dirty();
    }

    /// For each candidate, whether it awaits (re)processing
    pub fn what_files_dirty(&self, candidates: &[PathBuf]) -> Vec<bool> {
        self.tracker.what_files_dirty(candidates)
    }

    // ---- scheduling ----

    /// Request a pass without new dirt
    pub fn schedule_update(&self) {
        self.scheduler.schedule();
    }

    /// Run `callback` once the next pass has completed
    pub fn invoke_after_update(
        &self,
        callback: impl FnOnce() + Send + 'static,
        mode: InvokeMode,
        cancel: Option<&ProgressHandle>,
    ) -> Result<()> {
        Ok(self.scheduler.invoke_after_update(callback, mode, cancel)?)
    }

    /// Block until a pass started after this call has completed and its
    /// events were delivered
    ///
    /// Returns false if the configured refresh timeout elapses.
    pub fn wait_until_refreshed(&self) -> bool {
        self.scheduler
            .wait_until_refreshed(self.config.refresh_timeout())
            && self.notifier.flush(NOTIFY_DRAIN_TIMEOUT)
    }

    /// Schedule a pass and wait for it, including event delivery
    pub fn ensure_up_to_date(&self, cancel: Option<&ProgressHandle>) -> Result<()> {
        self.scheduler
            .invoke_after_update(|| {}, InvokeMode::Sync, cancel)?;
        if !self.notifier.flush(NOTIFY_DRAIN_TIMEOUT) {
            return Err(EngineError::Timeout(NOTIFY_DRAIN_TIMEOUT));
        }
        Ok(())
    }

    /// Let the pending pass finish, then hold off further passes
    pub fn freeze(&self, reason: &str, cancel: Option<&ProgressHandle>) -> Result<()> {
        Ok(self.scheduler.freeze(reason, cancel)?)
    }

    pub fn unfreeze(&self) {
        self.scheduler.unfreeze();
    }

    pub fn frozen_reason(&self) -> Option<String> {
        self.scheduler.frozen_reason()
    }

    /// Keep accepting dirt but run no passes until [`Self::go`]
    pub fn pause(&self) {
        self.scheduler.pause();
    }

    pub fn go(&self) {
        self.scheduler.go();
    }

    pub fn is_paused(&self) -> bool {
        self.scheduler.is_paused()
    }

    /// Cancel the pass in flight; its dirt is processed again later
    pub fn cancel_update(&self) -> bool {
        self.engine.cancel()
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.tracker.is_in_progress()
    }

    pub fn phase(&self) -> EnginePhase {
        self.engine.phase()
    }

    pub fn pass_count(&self) -> u64 {
        self.engine.pass_count()
    }

    pub fn last_outcome(&self) -> Option<PassOutcome> {
        self.engine.last_outcome()
    }

    // ---- reads ----

    pub fn lists(&self) -> Vec<ChangeList> {
        self.data.lock().worker.lists().to_vec()
    }

    pub fn default_list(&self) -> Option<ChangeList> {
        self.data.lock().worker.default_list().cloned()
    }

    pub fn find_list(&self, name: &str) -> Option<ChangeList> {
        self.data.lock().worker.find_list(name).cloned()
    }

    pub fn list_for_change(&self, change: &Change) -> Option<ChangeList> {
        self.data.lock().worker.list_for_change(change).cloned()
    }

    pub fn list_for_path(&self, path: &Path) -> Option<ChangeList> {
        self.data.lock().worker.list_for_path(path).cloned()
    }

    pub fn all_changes(&self) -> Vec<Change> {
        self.data.lock().worker.all_changes().cloned().collect()
    }

    pub fn change_for_path(&self, path: &Path) -> Option<Change> {
        self.data.lock().worker.change_for_path(path).cloned()
    }

    pub fn changes_in(&self, dir: &Path) -> Vec<Change> {
        self.data
            .lock()
            .worker
            .changes_in(dir)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn have_changes_under(&self, dir: &Path) -> bool {
        self.data.lock().worker.have_changes_under(dir)
    }

    pub fn affected_paths(&self) -> Vec<PathBuf> {
        self.data.lock().worker.affected_paths()
    }

    /// Status of `path`: changes first, then the file categories
    pub fn status(&self, path: &Path) -> FileStatus {
        let data = self.data.lock();
        match data.worker.status(path) {
            FileStatus::NotChanged => data.composite.status(path).unwrap_or(FileStatus::NotChanged),
            status => status,
        }
    }

    /// Files in category `kind`
    pub fn files(&self, kind: HolderKind) -> Vec<FilePath> {
        self.data.lock().composite.holder(kind).files().collect()
    }

    pub fn unversioned_files(&self) -> Vec<FilePath> {
        self.files(HolderKind::Unversioned)
    }

    pub fn ignored_files(&self) -> Vec<FilePath> {
        self.files(HolderKind::Ignored)
    }

    pub fn locally_deleted_files(&self) -> Vec<FilePath> {
        self.data.lock().worker.locally_deleted().collect()
    }

    pub fn switched_branch(&self, path: &Path) -> Option<String> {
        self.data
            .lock()
            .worker
            .switched_branch(path)
            .map(str::to_string)
    }

    /// Copy of the authoritative model
    pub fn snapshot(&self) -> (ChangeListWorker, FileHolderComposite) {
        let data = self.data.lock();
        (data.worker.clone(), data.composite.clone())
    }

    /// Error of the last failed pass, until a pass commits
    pub fn update_error(&self) -> Option<VcsError> {
        self.data.lock().update_error.clone()
    }

    /// Diagnostic banner a provider reported
    pub fn additional_info(&self) -> Option<String> {
        self.data.lock().additional_info.clone()
    }

    // ---- list mutations ----

    fn execute(&self, command: ListCommand) -> Result<()> {
        let mut data = self.data.lock();
        let ModelData {
            worker, modifier, ..
        } = &mut *data;
        let events = modifier.execute(worker, command)?;
        self.notifier.publish_all(events);
        Ok(())
    }

    pub fn add_change_list(&self, name: &str, comment: Option<&str>) -> Result<ChangeList> {
        let id = Uuid::new_v4();
        self.execute(ListCommand::AddList {
            id,
            name: name.to_string(),
            comment: comment.map(str::to_string),
        })?;
        self.data
            .lock()
            .worker
            .list_by_id(id)
            .cloned()
            .ok_or_else(|| EngineError::Internal(format!("List {} vanished after creation", name)))
    }

    /// Remove list `name`; its changes move to the default list
    pub fn remove_change_list(&self, name: &str) -> Result<()> {
        self.execute(ListCommand::RemoveList {
            name: name.to_string(),
        })
    }

    pub fn set_default_list(&self, name: &str) -> Result<()> {
        self.execute(ListCommand::SetDefault {
            name: name.to_string(),
        })
    }

    pub fn edit_name(&self, from: &str, to: &str) -> Result<()> {
        self.execute(ListCommand::EditName {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    pub fn edit_comment(&self, name: &str, comment: &str) -> Result<()> {
        self.execute(ListCommand::EditComment {
            name: name.to_string(),
            comment: comment.to_string(),
        })
    }

    pub fn set_read_only(&self, name: &str, read_only: bool) -> Result<()> {
        self.execute(ListCommand::SetReadOnly {
            name: name.to_string(),
            read_only,
        })
    }

    pub fn move_changes_to(&self, name: &str, changes: &[Change]) -> Result<()> {
        self.execute(ListCommand::MoveChanges {
            to: name.to_string(),
            keys: changes.iter().map(Change::key).collect(),
        })
    }

    // ---- ignored files ----

    pub fn ignored_rules(&self) -> Vec<IgnoreRule> {
        self.data.lock().ignored.rules().to_vec()
    }

    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        self.data.lock().ignored.is_ignored(path, is_dir)
    }

    /// Add ignored-file rules and re-sort unversioned and ignored files
    pub fn add_ignored_rules(&self, rules: impl IntoIterator<Item = IgnoreRule>) -> Result<()> {
        let affected = {
            let mut data = self.data.lock();
            let added = data
                .ignored
                .add(rules)
                .map_err(|e| EngineError::Internal(format!("{:#}", e)))?;
            if !added {
                return Ok(());
            }
            data.composite.unversioned_and_ignored()
        };
        self.tracker.files_dirty(affected, std::iter::empty());
        Ok(())
    }

    /// Replace the ignored-file rules and re-sort unversioned and ignored files
    pub fn set_ignored_rules(&self, rules: impl IntoIterator<Item = IgnoreRule>) -> Result<()> {
        let affected = {
            let mut data = self.data.lock();
            data.ignored
                .set(rules)
                .map_err(|e| EngineError::Internal(format!("{:#}", e)))?;
            data.composite.unversioned_and_ignored()
        };
        self.tracker.files_dirty(affected, std::iter::empty());
        Ok(())
    }

    // ---- persistence ----

    /// Lists, their changes and the ignored-file rules as JSON
    pub fn serialize_state(&self) -> Result<String> {
        let data = self.data.lock();
        let state = PersistedState::capture(&data.worker, data.ignored.rules());
        Ok(state.to_json()?)
    }

    /// Replace lists and ignored-file rules with a serialized state
    ///
    /// Refused while a pass is running. The next pass rescans everything.
    pub fn load_state(&self, json: &str) -> Result<()> {
        let state = PersistedState::from_json(json)?;
        {
            let mut data = self.data.lock();
            if data.modifier.is_in_update() {
                return Err(EngineError::Internal(
                    "cannot load state while an update is running".to_string(),
                ));
            }
            data.ignored
                .set(state.ignored.iter().cloned())
                .map_err(|e| EngineError::Internal(format!("{:#}", e)))?;
            data.worker = state.restore(&self.config.default_list_name);
            data.composite = FileHolderComposite::new();
            debug!("Loaded {} change lists", data.worker.list_count());
        }
        self.tracker.mark_everything_dirty();
        Ok(())
    }
}

impl Drop for ChangeListManager {
    fn drop(&mut self) {
        self.dispose();
    }
}
