//! Event layer error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EventError>;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("connection '{0}' is not registered")]
    UnknownConnection(String),

    #[error("no pending interactive prompt for execution '{execution_id}' node '{node_id}'")]
    NoPendingPrompt {
        execution_id: String,
        node_id: String,
    },

    #[error("observer error: {0}")]
    Observer(String),

    #[error(transparent)]
    State(#[from] dipeo_state::StateError),
}
