//! Debounced, serialized scheduling of reconciliation passes
//!
//! Schedule requests arm a timer; when it fires the single worker thread runs
//! the delegate once. Requests arriving while the timer is armed coalesce
//! into it; requests arriving while a pass runs produce exactly one follow-up
//! pass.

use crossbeam_channel::{bounded, RecvTimeoutError};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};
use vcsync_core::{EngineConfig, HeavyOperationSignal, ProgressHandle};

use crate::tracker::UpdateTrigger;

/// Runs one reconciliation pass
pub trait UpdateDelegate: Send + Sync {
    fn run_update(&self);
}

/// How [`UpdateScheduler::invoke_after_update`] waits for its callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeMode {
    /// Return immediately
    Async,
    /// Block until the callback has run
    Sync,
}

/// Failures of the blocking scheduler operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Scheduler is stopped")]
    Stopped,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Scheduled { deadline: Instant },
    Running,
}

struct SchedulerState {
    phase: Phase,
    paused: bool,
    stopped: bool,
    ignore_background_operation: bool,
    rerun_requested: bool,
    /// Callbacks to run after the next pass that starts
    waiting: Vec<Callback>,
    heavy_backoffs: u32,
    freeze_reason: Option<String>,
    passes: u64,
}

struct Shared {
    state: Mutex<SchedulerState>,
    cond: Condvar,
    update_delay: Duration,
    poll_interval: Duration,
    max_heavy_backoffs: u32,
    heavy: Option<Arc<dyn HeavyOperationSignal>>,
}

impl Shared {
    fn arm(&self, state: &mut SchedulerState) {
        if state.stopped {
            trace!("Scheduler stopped, ignoring schedule request");
            return;
        }
        match state.phase {
            Phase::Idle => {
                state.phase = Phase::Scheduled {
                    deadline: Instant::now() + self.update_delay,
                };
                trace!("Update timer armed ({:?})", self.update_delay);
                self.cond.notify_all();
            }
            Phase::Scheduled { .. } => {}
            Phase::Running => state.rerun_requested = true,
        }
    }

    fn rearm(&self, state: &mut SchedulerState) {
        state.phase = Phase::Scheduled {
            deadline: Instant::now() + self.update_delay,
        };
    }

    fn heavy_operation_in_progress(&self) -> bool {
        self.heavy
            .as_ref()
            .is_some_and(|signal| signal.is_heavy_operation_in_progress())
    }
}

/// Debouncing scheduler with a single background worker
pub struct UpdateScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Mutex<Option<ThreadId>>,
}

impl UpdateScheduler {
    /// Create a scheduler; passes run once [`start`](Self::start) is called
    pub fn new(config: &EngineConfig, heavy: Option<Arc<dyn HeavyOperationSignal>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState {
                    phase: Phase::Idle,
                    paused: false,
                    stopped: false,
                    ignore_background_operation: false,
                    rerun_requested: false,
                    waiting: Vec::new(),
                    heavy_backoffs: 0,
                    freeze_reason: None,
                    passes: 0,
                }),
                cond: Condvar::new(),
                update_delay: config.update_delay(),
                poll_interval: config.freeze_poll_interval(),
                max_heavy_backoffs: config.max_heavy_backoffs,
                heavy,
            }),
            worker: Mutex::new(None),
            worker_id: Mutex::new(None),
        }
    }

    /// Spawn the worker thread running `delegate`
    pub fn start(&self, delegate: Arc<dyn UpdateDelegate>) -> Result<(), SchedulerError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("Update scheduler already started");
            return Ok(());
        }

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("vcsync-update".to_string())
            .spawn(move || run_loop(shared, delegate))
            .map_err(|e| SchedulerError::Internal(format!("Failed to spawn worker: {}", e)))?;

        *self.worker_id.lock() = Some(handle.thread().id());
        *worker = Some(handle);
        Ok(())
    }

    /// Request a pass after the debounce delay
    pub fn schedule(&self) {
        let mut state = self.shared.state.lock();
        self.shared.arm(&mut state);
    }

    /// Keep passes from starting; schedule requests are still accepted
    pub fn pause(&self) {
        self.shared.state.lock().paused = true;
        debug!("Update scheduler paused");
    }

    /// Resume after [`pause`](Self::pause)
    pub fn go(&self) {
        self.shared.state.lock().paused = false;
        self.shared.cond.notify_all();
        debug!("Update scheduler resumed");
    }

    /// Stop for good, running every pending after-update callback on the
    /// caller's thread
    ///
    /// A pass already running is not interrupted.
    pub fn stop(&self) {
        let callbacks = {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            if state.phase != Phase::Running {
                state.phase = Phase::Idle;
            }
            self.shared.cond.notify_all();
            std::mem::take(&mut state.waiting)
        };
        info!("Update scheduler stopped ({} pending callbacks)", callbacks.len());
        run_callbacks(callbacks);
    }

    /// Run `callback` after the next completed pass
    ///
    /// Implicitly schedules a pass. On a stopped scheduler the callback runs
    /// right away: on a new thread in [`InvokeMode::Async`], inline in
    /// [`InvokeMode::Sync`]. In sync mode `cancel` is polled while waiting.
    pub fn invoke_after_update(
        &self,
        callback: impl FnOnce() + Send + 'static,
        mode: InvokeMode,
        cancel: Option<&ProgressHandle>,
    ) -> Result<(), SchedulerError> {
        let mut state = self.shared.state.lock();
        if state.stopped {
            drop(state);
            return match mode {
                InvokeMode::Async => thread::Builder::new()
                    .name("vcsync-after-update".to_string())
                    .spawn(move || run_callbacks(vec![Box::new(callback) as Callback]))
                    .map(|_| ())
                    .map_err(|e| SchedulerError::Internal(format!("Failed to spawn callback: {}", e))),
                InvokeMode::Sync => {
                    run_callbacks(vec![Box::new(callback) as Callback]);
                    Ok(())
                }
            };
        }

        match mode {
            InvokeMode::Async => {
                state.waiting.push(Box::new(callback));
                self.shared.arm(&mut state);
                Ok(())
            }
            InvokeMode::Sync => {
                let (tx, rx) = bounded::<()>(1);
                state.waiting.push(Box::new(move || {
                    callback();
                    let _ = tx.send(());
                }));
                self.shared.arm(&mut state);
                drop(state);
                self.wait_for(&rx, cancel, None)
            }
        }
    }

    /// Block until a pass started after this call has completed
    ///
    /// Returns false (and logs) if `timeout` elapses first.
    pub fn wait_until_refreshed(&self, timeout: Duration) -> bool {
        let (tx, rx) = bounded::<()>(1);
        {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return true;
            }
            state.waiting.push(Box::new(move || {
                let _ = tx.send(());
            }));
            self.shared.arm(&mut state);
        }

        match self.wait_for(&rx, None, Some(timeout)) {
            Ok(()) => true,
            Err(e) => {
                warn!("Waiting for refresh failed: {}", e);
                false
            }
        }
    }

    /// Force the pending pass to run, wait for it, then pause with `reason`
    ///
    /// The heavy-operation backoff is bypassed for the forced pass.
    pub fn freeze(&self, reason: &str, cancel: Option<&ProgressHandle>) -> Result<(), SchedulerError> {
        {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return Err(SchedulerError::Stopped);
            }
            state.ignore_background_operation = true;
        }

        let abandoned = Arc::new(AtomicBool::new(false));
        let shared = self.shared.clone();
        let freeze_reason = reason.to_string();
        let callback_abandoned = abandoned.clone();
        let result = self.invoke_after_update(
            move || {
                let mut state = shared.state.lock();
                state.ignore_background_operation = false;
                if callback_abandoned.load(Ordering::SeqCst) || state.stopped {
                    return;
                }
                state.paused = true;
                state.freeze_reason = Some(freeze_reason);
            },
            InvokeMode::Sync,
            cancel,
        );

        if result.is_err() {
            abandoned.store(true, Ordering::SeqCst);
            self.shared.state.lock().ignore_background_operation = false;
        } else {
            debug!("Update scheduler frozen: {}", reason);
        }
        result
    }

    /// Clear the freeze reason and resume
    pub fn unfreeze(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.freeze_reason.take().is_none() && !state.paused {
                return;
            }
            state.paused = false;
        }
        self.shared.cond.notify_all();
        debug!("Update scheduler unfrozen");
    }

    /// Reason given to the active freeze
    pub fn frozen_reason(&self) -> Option<String> {
        self.shared.state.lock().freeze_reason.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }

    /// Check if a pass is armed or running
    pub fn is_busy(&self) -> bool {
        self.shared.state.lock().phase != Phase::Idle
    }

    /// Number of completed passes
    pub fn pass_count(&self) -> u64 {
        self.shared.state.lock().passes
    }

    fn wait_for(
        &self,
        rx: &crossbeam_channel::Receiver<()>,
        cancel: Option<&ProgressHandle>,
        timeout: Option<Duration>,
    ) -> Result<(), SchedulerError> {
        let started = Instant::now();
        loop {
            let mut wait = self.shared.poll_interval;
            if let Some(timeout) = timeout {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    return Err(SchedulerError::Timeout(timeout));
                }
                wait = wait.min(timeout - elapsed);
            }

            match rx.recv_timeout(wait) {
                Ok(()) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_some_and(ProgressHandle::is_cancelled) {
                        return Err(SchedulerError::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SchedulerError::Internal(
                        "after-update callback did not complete".to_string(),
                    ))
                }
            }
        }
    }
}

impl UpdateTrigger for UpdateScheduler {
    fn schedule(&self) {
        UpdateScheduler::schedule(self);
    }
}

impl Drop for UpdateScheduler {
    fn drop(&mut self) {
        self.stop();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if Some(thread::current().id()) != *self.worker_id.lock() {
                let _ = handle.join();
            }
        }
    }
}

fn run_loop(shared: Arc<Shared>, delegate: Arc<dyn UpdateDelegate>) {
    let mut state = shared.state.lock();
    loop {
        if state.stopped {
            break;
        }

        let deadline = match state.phase {
            Phase::Scheduled { deadline } => deadline,
            Phase::Idle | Phase::Running => {
                shared.cond.wait(&mut state);
                continue;
            }
        };

        if Instant::now() < deadline {
            shared.cond.wait_until(&mut state, deadline);
            continue;
        }

        if state.paused {
            trace!("Update scheduler paused, re-arming");
            shared.rearm(&mut state);
            continue;
        }

        if !state.ignore_background_operation && shared.heavy_operation_in_progress() {
            state.heavy_backoffs += 1;
            if shared.max_heavy_backoffs == 0 || state.heavy_backoffs <= shared.max_heavy_backoffs {
                debug!(
                    "Heavy operation in progress, deferring update ({})",
                    state.heavy_backoffs
                );
                shared.rearm(&mut state);
                continue;
            }
            warn!(
                "Heavy operation still in progress after {} deferrals, updating anyway",
                shared.max_heavy_backoffs
            );
        }

        run_pass(&shared, &mut state, delegate.as_ref());
    }
    debug!("Update worker exiting");
}

fn run_pass(shared: &Shared, state: &mut MutexGuard<'_, SchedulerState>, delegate: &dyn UpdateDelegate) {
    state.heavy_backoffs = 0;
    state.rerun_requested = false;
    state.phase = Phase::Running;
    let callbacks = std::mem::take(&mut state.waiting);

    MutexGuard::unlocked(state, || {
        if catch_unwind(AssertUnwindSafe(|| delegate.run_update())).is_err() {
            error!("Update pass panicked");
        }
    });
    state.passes += 1;
    MutexGuard::unlocked(state, || run_callbacks(callbacks));

    state.phase = Phase::Idle;
    if state.rerun_requested && !state.stopped {
        state.rerun_requested = false;
        shared.rearm(state);
    }
    shared.cond.notify_all();
}

fn run_callbacks(callbacks: Vec<Callback>) {
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
            error!("After-update callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use vcsync_core::HeavyOperationFlag;

    #[derive(Default)]
    struct CountingDelegate {
        runs: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        sleep: Duration,
    }

    impl UpdateDelegate for CountingDelegate {
        fn run_update(&self) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.sleep);
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            update_delay_ms: 20,
            freeze_poll_interval_ms: 10,
            ..EngineConfig::default()
        }
    }

    fn started(delegate: Arc<CountingDelegate>) -> UpdateScheduler {
        let scheduler = UpdateScheduler::new(&config(), None);
        scheduler.start(delegate).unwrap();
        scheduler
    }

    #[test]
    fn test_schedule_coalesces() {
        let delegate = Arc::new(CountingDelegate::default());
        let scheduler = started(delegate.clone());

        for _ in 0..10 {
            scheduler.schedule();
        }
        assert!(scheduler.wait_until_refreshed(Duration::from_secs(5)));

        // The burst collapses into one pass; the refresh wait may add one more
        assert!(delegate.runs.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_schedule_during_pass_runs_exactly_one_follow_up() {
        let delegate = Arc::new(CountingDelegate {
            sleep: Duration::from_millis(100),
            ..CountingDelegate::default()
        });
        let scheduler = started(delegate.clone());

        scheduler.schedule();
        while delegate.running.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        for _ in 0..5 {
            scheduler.schedule();
        }

        while scheduler.is_busy() {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(delegate.runs.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.pass_count(), 2);
    }

    #[test]
    fn test_paused_scheduler_runs_nothing() {
        let delegate = Arc::new(CountingDelegate::default());
        let scheduler = started(delegate.clone());

        scheduler.pause();
        scheduler.schedule();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(delegate.runs.load(Ordering::SeqCst), 0);

        scheduler.go();
        assert!(scheduler.wait_until_refreshed(Duration::from_secs(5)));
        assert!(delegate.runs.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_stop_runs_pending_callbacks_on_caller() {
        // Never started: callbacks can only run through stop
        let scheduler = UpdateScheduler::new(&config(), None);

        let caller = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let slot = ran_on.clone();
        scheduler
            .invoke_after_update(
                move || *slot.lock() = Some(thread::current().id()),
                InvokeMode::Async,
                None,
            )
            .unwrap();

        scheduler.stop();
        assert_eq!(*ran_on.lock(), Some(caller));
        assert!(scheduler.is_stopped());
    }

    #[test]
    fn test_invoke_after_stop_runs_immediately() {
        let scheduler = UpdateScheduler::new(&config(), None);
        scheduler.stop();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        scheduler
            .invoke_after_update(move || flag.store(true, Ordering::SeqCst), InvokeMode::Sync, None)
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_sync_invoke_waits_for_pass() {
        let delegate = Arc::new(CountingDelegate::default());
        let scheduler = started(delegate.clone());

        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let observer = delegate.clone();
        let slot = seen.clone();
        scheduler
            .invoke_after_update(
                move || slot.store(observer.runs.load(Ordering::SeqCst), Ordering::SeqCst),
                InvokeMode::Sync,
                None,
            )
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sync_invoke_cancelled_while_paused() {
        let scheduler = started(Arc::new(CountingDelegate::default()));
        scheduler.pause();

        let cancel = ProgressHandle::new();
        let canceller = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let result = scheduler.invoke_after_update(|| {}, InvokeMode::Sync, Some(&cancel));
        assert_eq!(result, Err(SchedulerError::Cancelled));
        handle.join().unwrap();
    }

    #[test]
    fn test_freeze_bypasses_heavy_operation_and_pauses() {
        let heavy = Arc::new(HeavyOperationFlag::new());
        let scheduler = UpdateScheduler::new(
            &EngineConfig {
                max_heavy_backoffs: 0,
                ..config()
            },
            Some(heavy.clone()),
        );
        let delegate = Arc::new(CountingDelegate::default());
        scheduler.start(delegate.clone()).unwrap();

        let _guard = heavy.begin();
        scheduler.schedule();
        thread::sleep(Duration::from_millis(80));
        assert_eq!(delegate.runs.load(Ordering::SeqCst), 0);

        scheduler.freeze("commit", None).unwrap();
        assert_eq!(delegate.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.frozen_reason().as_deref(), Some("commit"));

        scheduler.schedule();
        thread::sleep(Duration::from_millis(80));
        assert_eq!(delegate.runs.load(Ordering::SeqCst), 1);

        scheduler.unfreeze();
        assert_eq!(scheduler.frozen_reason(), None);
        assert!(!scheduler.is_paused());
    }

    #[test]
    fn test_heavy_backoff_is_bounded() {
        let heavy = Arc::new(HeavyOperationFlag::new());
        let scheduler = UpdateScheduler::new(
            &EngineConfig {
                max_heavy_backoffs: 2,
                ..config()
            },
            Some(heavy.clone()),
        );
        let delegate = Arc::new(CountingDelegate::default());
        scheduler.start(delegate.clone()).unwrap();

        let _guard = heavy.begin();
        scheduler.schedule();
        let deadline = Instant::now() + Duration::from_secs(5);
        while delegate.runs.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(delegate.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_delegate_keeps_worker_alive() {
        struct Panicky(AtomicUsize);
        impl UpdateDelegate for Panicky {
            fn run_update(&self) {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("scan exploded");
                }
            }
        }

        let delegate = Arc::new(Panicky(AtomicUsize::new(0)));
        let scheduler = UpdateScheduler::new(&config(), None);
        scheduler.start(delegate.clone()).unwrap();

        assert!(scheduler.wait_until_refreshed(Duration::from_secs(5)));
        assert!(scheduler.wait_until_refreshed(Duration::from_secs(5)));
        assert!(delegate.0.load(Ordering::SeqCst) >= 2);
    }
}
