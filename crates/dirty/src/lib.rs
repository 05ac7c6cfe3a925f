//! Dirty tracking and update scheduling for vcsync
//!
//! This crate decides *what* needs reconciling and *when*:
//! - `DirtyMarkSet`: minimal per-root set of file and recursive-directory marks
//! - `DirtyScopeTracker`: root-keyed accumulation, claimed one batch per pass
//! - `UpdateScheduler`: debounced single-worker scheduling with pause, freeze
//!   and after-update callbacks

pub mod debounce;
pub mod marks;
pub mod tracker;

// Re-exports
pub use debounce::{InvokeMode, SchedulerError, UpdateDelegate, UpdateScheduler};
pub use marks::{DirtyMark, DirtyMarkSet};
pub use tracker::{DirtyScope, DirtyScopeTracker, Invalidated, UpdateTrigger};
