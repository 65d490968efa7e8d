use thiserror::Error;

pub const MAX_NAME_LEN: usize = 255;

// Input validation errors
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ModelError {
    #[error("task name cannot be empty")]
    EmptyName,
    #[error("task name cannot exceed 255 characters (got {0})")]
    NameTooLong(usize),
    #[error("invalid task status: {0}")]
    InvalidStatus(String),
}
