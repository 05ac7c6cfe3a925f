//! Error types for the engine's synchronous operations

use std::time::Duration;
use thiserror::Error;
use vcsync_dirty::SchedulerError;
use vcsync_model::ModelError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Change list manager is stopped")]
    Stopped,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl From<SchedulerError> for EngineError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Cancelled => EngineError::Cancelled,
            SchedulerError::Stopped => EngineError::Stopped,
            SchedulerError::Timeout(timeout) => EngineError::Timeout(timeout),
            SchedulerError::Internal(message) => EngineError::Internal(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
