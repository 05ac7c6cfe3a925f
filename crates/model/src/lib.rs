//! Change-list model for vcsync
//!
//! The authoritative snapshot of pending changes:
//! - `ChangeList`: named grouping of changes, one of them the default
//! - `ChangeListWorker`: all lists plus per-path status, cloned per pass
//! - `FileHolderComposite`: unversioned, ignored and other file categories
//! - `Modifier`: user mutations replayed onto in-flight clones
//! - `PersistedState`: JSON form of lists and ignored-file rules

pub mod error;
pub mod events;
pub mod holders;
pub mod list;
pub mod modifier;
pub mod state;
pub mod worker;

// Re-exports
pub use error::{ModelError, Result};
pub use events::ChangeListEvent;
pub use holders::{FileHolder, FileHolderComposite, HolderKind};
pub use list::{ChangeList, ProcessingDelta};
pub use modifier::{ListCommand, Modifier};
pub use state::{PersistedChange, PersistedList, PersistedState};
pub use worker::{ChangeListWorker, SwitchedEntry};
