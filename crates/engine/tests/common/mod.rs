//! Common utilities for engine integration tests

#![allow(dead_code)]

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vcsync_core::{
    Change, EngineConfig, FilePath, ProgressHandle, ScanError, StaticRootResolver, VcsError,
    VcsKey, VcsRoot,
};
use vcsync_dirty::DirtyScope;
use vcsync_engine::{ChangeListListener, ChangeListManager, ChangeProvider, ChangelistBuilder};
use vcsync_model::ChangeListEvent;

pub const ROOT: &str = "/root";

pub fn fake_vcs() -> VcsKey {
    VcsKey::new("fake")
}

pub fn path(relative: &str) -> PathBuf {
    Path::new(ROOT).join(relative)
}

pub fn file(relative: &str) -> FilePath {
    FilePath::file(path(relative))
}

/// What the fake repository says about one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Added,
    Modified,
    Deleted,
    MovedFrom(PathBuf),
    Unversioned,
    Ignored,
    LocallyDeleted,
}

/// Holds the provider inside a scan until released
struct Gate {
    entered: Sender<()>,
    release: Receiver<()>,
}

/// Handles for a gated scan
pub struct GateHandle {
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

impl GateHandle {
    pub fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(10))
            .expect("provider never entered the scan");
    }

    pub fn open(&self) {
        let _ = self.release.send(());
    }
}

/// In-memory repository reporting whatever its scope covers
#[derive(Default)]
pub struct FakeVcs {
    entries: Mutex<BTreeMap<PathBuf, Entry>>,
    fail_next: Mutex<Option<VcsError>>,
    panic_next: Mutex<bool>,
    gate: Mutex<Option<Gate>>,
    info: Mutex<Option<String>>,
    report_delay: Mutex<Duration>,
    scopes: Mutex<Vec<DirtyScope>>,
    calls: AtomicUsize,
}

impl FakeVcs {
    pub fn set(&self, relative: &str, entry: Entry) {
        self.entries.lock().insert(path(relative), entry);
    }

    pub fn remove(&self, relative: &str) {
        self.entries.lock().remove(&path(relative));
    }

    pub fn fail_next(&self, error: VcsError) {
        *self.fail_next.lock() = Some(error);
    }

    pub fn panic_next(&self) {
        *self.panic_next.lock() = true;
    }

    pub fn set_info(&self, text: &str) {
        *self.info.lock() = Some(text.to_string());
    }

    pub fn set_report_delay(&self, delay: Duration) {
        *self.report_delay.lock() = delay;
    }

    /// Hold the next scan until the returned handle is opened
    pub fn gate_next(&self) -> GateHandle {
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        *self.gate.lock() = Some(Gate {
            entered: entered_tx,
            release: release_rx,
        });
        GateHandle {
            entered: entered_rx,
            release: release_tx,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn scopes(&self) -> Vec<DirtyScope> {
        self.scopes.lock().clone()
    }
}

impl ChangeProvider for FakeVcs {
    fn get_changes(
        &self,
        scope: &DirtyScope,
        builder: &mut dyn ChangelistBuilder,
        progress: &ProgressHandle,
    ) -> Result<(), ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scopes.lock().push(scope.clone());

        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv_timeout(Duration::from_secs(10));
        }
        progress.check_cancelled()?;

        if std::mem::take(&mut *self.panic_next.lock()) {
            panic!("fake provider blew up");
        }
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error.into());
        }
        if let Some(text) = self.info.lock().as_deref() {
            builder.report_additional_info(text);
        }

        let delay = *self.report_delay.lock();
        let entries = self.entries.lock().clone();
        for (path, entry) in entries {
            let target = FilePath::file(path.clone());
            let in_scope = match &entry {
                Entry::MovedFrom(from) => scope.belongs_to(&path) || scope.belongs_to(from),
                _ => scope.belongs_to(&path),
            };
            if !in_scope {
                continue;
            }
            match entry {
                Entry::Added => builder.process_change(Change::added(target, "1"), None),
                Entry::Modified => builder.process_change(Change::modified(target, "1"), None),
                Entry::Deleted => builder.process_change(Change::deleted(target, "1"), None),
                Entry::MovedFrom(from) => {
                    builder.process_change(Change::moved(FilePath::file(from), target, "1"), None)
                }
                Entry::Unversioned => builder.process_unversioned_file(&target),
                Entry::Ignored => builder.process_ignored_file(&target),
                Entry::LocallyDeleted => builder.process_locally_deleted_file(&target),
            }
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
        Ok(())
    }
}

/// Listener that records every event
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ChangeListEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ChangeListEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn count(&self, predicate: impl Fn(&ChangeListEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }
}

impl ChangeListListener for RecordingListener {
    fn on_event(&self, event: &ChangeListEvent) {
        self.events.lock().push(event.clone());
    }
}

/// A manager over one fake root, opened and past its startup scan
pub struct TestProject {
    pub manager: ChangeListManager,
    pub vcs: Arc<FakeVcs>,
    pub listener: Arc<RecordingListener>,
    pub resolver: Arc<StaticRootResolver>,
}

impl TestProject {
    pub fn new() -> Self {
        Self::with_vcs(Arc::new(FakeVcs::default()))
    }

    pub fn with_vcs(vcs: Arc<FakeVcs>) -> Self {
        let project = Self::unopened(vcs);
        project.manager.project_opened().unwrap();
        assert!(project.manager.wait_until_refreshed());
        project
    }

    /// Everything wired, but `project_opened` not called yet
    pub fn unopened(vcs: Arc<FakeVcs>) -> Self {
        let resolver = Arc::new(StaticRootResolver::with_roots([VcsRoot::new(
            ROOT,
            fake_vcs(),
        )]));
        let manager = ChangeListManager::new(test_config(), ROOT, resolver.clone(), None).unwrap();
        manager.register_provider(fake_vcs(), vcs.clone());
        let listener = Arc::new(RecordingListener::default());
        manager.add_listener(listener.clone());

        Self {
            manager,
            vcs,
            listener,
            resolver,
        }
    }

    /// Mark `relative` dirty and wait for the pass that picks it up
    pub fn refresh_file(&self, relative: &str) {
        self.manager.file_dirty(&file(relative));
        assert!(self.manager.wait_until_refreshed());
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        update_delay_ms: 20,
        refresh_timeout_secs: 10,
        freeze_poll_interval_ms: 10,
        ..EngineConfig::default()
    }
}
