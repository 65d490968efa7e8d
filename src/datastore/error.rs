use thiserror::*;

use crate::model::ModelError;

#[derive(Debug, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("validation failed: {0}")]
    Validation(#[from] ModelError),

    #[error("task with ID {0} not found")]
    NotFound(String),

    #[error("maximum tasks limit reached ({0})")]
    CapacityExceeded(usize),

    #[error("no updates provided")]
    NoOpUpdate,

    #[error("storage is unhealthy: {0}")]
    Unhealthy(String),
}
