//! State store error types.

use dipeo_domain::ExecutionId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("execution '{0}' not found")]
    NotFound(ExecutionId),

    #[error("execution '{0}' already exists")]
    AlreadyExists(ExecutionId),

    #[error("execution '{id}' is terminal; refusing {operation}")]
    Terminal {
        id: ExecutionId,
        operation: &'static str,
    },

    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
