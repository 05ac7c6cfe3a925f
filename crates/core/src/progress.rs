//! Cooperative cancellation and the heavy-operation signal

use crate::error::Cancelled;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Cloneable cancellation handle shared between a pass and its controllers
///
/// Cancellation is cooperative: code doing long work calls
/// [`check_cancelled`](Self::check_cancelled) at safe points.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    cancelled: Arc<AtomicBool>,
}

impl ProgressHandle {
    /// Create a handle that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`Cancelled`] if cancellation was requested
    pub fn check_cancelled(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Signals that a bulk background operation (e.g. a large file-system
/// refresh) is in progress and reconciliation should back off
pub trait HeavyOperationSignal: Send + Sync {
    fn is_heavy_operation_in_progress(&self) -> bool;
}

/// Counting heavy-operation flag
///
/// Nested operations are supported; the signal is raised while at least one
/// guard returned by [`begin`](Self::begin) is alive.
#[derive(Debug, Default)]
pub struct HeavyOperationFlag {
    active: AtomicUsize,
}

impl HeavyOperationFlag {
    /// Create a lowered flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag until the returned guard is dropped
    pub fn begin(&self) -> HeavyOperationGuard<'_> {
        self.active.fetch_add(1, Ordering::SeqCst);
        HeavyOperationGuard { flag: self }
    }
}

impl HeavyOperationSignal for HeavyOperationFlag {
    fn is_heavy_operation_in_progress(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }
}

/// Lowers its [`HeavyOperationFlag`] when dropped
pub struct HeavyOperationGuard<'a> {
    flag: &'a HeavyOperationFlag,
}

impl Drop for HeavyOperationGuard<'_> {
    fn drop(&mut self) {
        self.flag.active.fetch_sub(1, Ordering::SeqCst);
    }
}
