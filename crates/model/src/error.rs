//! Error types for change-list model operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Change list already exists: {0}")]
    DuplicateList(String),

    #[error("No such change list: {0}")]
    NoSuchList(String),

    #[error("Cannot remove the default change list: {0}")]
    CannotRemoveDefault(String),

    #[error("Change list is read-only: {0}")]
    ReadOnly(String),

    #[error("Invalid persisted state: {0}")]
    State(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
