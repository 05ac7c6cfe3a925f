//! Core types for vcsync
//!
//! This crate provides the vocabulary shared by the reconciliation engine:
//! - File paths, version-control roots and root resolution
//! - Changes, content revisions and file statuses
//! - Error types and the cooperative cancellation handle
//! - Engine configuration (TOML)
//! - Ignored-file rules

pub mod change;
pub mod config;
pub mod error;
pub mod ignored;
pub mod path;
pub mod progress;

// Re-exports
pub use change::{Change, ChangeKey, ChangeType, ContentRevision, FileStatus};
pub use config::EngineConfig;
pub use error::{Cancelled, ScanError, VcsError};
pub use ignored::{IgnoreRule, IgnoredFileRules};
pub use path::{is_ancestor, FilePath, RootResolver, StaticRootResolver, VcsKey, VcsRoot};
pub use progress::{HeavyOperationFlag, HeavyOperationGuard, HeavyOperationSignal, ProgressHandle};
