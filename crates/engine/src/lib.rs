//! Reconciliation engine for vcsync
//!
//! Keeps a project's change lists in step with what its version-control
//! backends report:
//! - `ChangeProvider` / `ChangelistBuilder`: the boundary to backends
//! - `ReconciliationEngine`: clone, scan and swap, one pass at a time
//! - `Notifier`: ordered event delivery to listeners
//! - `ChangeListManager`: the per-project facade tying it all together

pub mod builder;
pub mod engine;
pub mod error;
pub mod manager;
pub mod notify;
pub mod provider;

// Re-exports
pub use builder::UpdatingChangeListBuilder;
pub use engine::{EnginePhase, PassOutcome, ReconciliationEngine};
pub use error::{EngineError, Result};
pub use manager::ChangeListManager;
pub use notify::{ChangeListListener, ListenerId, Notifier};
pub use provider::{ChangeProvider, ChangelistBuilder, ProviderRegistry};
