//! Engine error types.
//!
//! Handler failures are converted by the engine into error envelopes and
//! status updates; only scheduler-level failures propagate out of
//! `execute` as `Err`.

use dipeo_domain::{ExecutionId, NodeId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A port was not bound in the service registry.
    #[error("missing service '{0}'")]
    MissingService(&'static str),

    /// No handler is registered for a node type.
    #[error("no handler registered for node type '{0}'")]
    MissingHandler(String),

    /// A handler raised or returned an error envelope.
    #[error("node '{node}' failed: {message}")]
    NodeExecution {
        node: NodeId,
        message: String,
        /// Error taxonomy kind (`timeout`, `cancelled`, `service`, ...).
        kind: &'static str,
    },

    /// A port or external adapter failed.
    #[error("service error: {message}")]
    Service { message: String, retryable: bool },

    /// Wall-clock exceeded.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Cooperative cancellation observed.
    #[error("execution '{0}' cancelled")]
    Cancelled(ExecutionId),

    /// The driving loop exceeded its global iteration bound.
    #[error("execution '{0}' exceeded max iterations")]
    MaxIterationsReached(ExecutionId),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error(transparent)]
    Compile(#[from] dipeo_compiler::CompileError),

    #[error(transparent)]
    Diagram(#[from] dipeo_diagram::DiagramError),

    #[error(transparent)]
    State(#[from] dipeo_state::StateError),

    #[error(transparent)]
    Event(#[from] dipeo_events::EventError),

    #[error(transparent)]
    Domain(#[from] dipeo_domain::DomainError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn node_execution(
        node: NodeId,
        message: impl Into<String>,
        kind: &'static str,
    ) -> Self {
        Self::NodeExecution {
            node,
            message: message.into(),
            kind,
        }
    }

    pub fn service(message: impl Into<String>, retryable: bool) -> Self {
        Self::Service {
            message: message.into(),
            retryable,
        }
    }

    /// Error taxonomy kind carried into error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::MissingService(_) | EngineError::MissingHandler(_) => "configuration",
            EngineError::NodeExecution { kind, .. } => kind,
            EngineError::Service { .. } => "service",
            EngineError::Timeout(_) => "timeout",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::MaxIterationsReached(_) => "max_iterations",
            EngineError::Template(_) => "template",
            EngineError::Compile(_) => "compile",
            EngineError::Diagram(_) => "diagram",
            EngineError::State(_) => "state",
            EngineError::Event(_) => "event",
            EngineError::Domain(_) => "domain",
            EngineError::Serialization(_) => "serialization",
            EngineError::Io(_) => "io",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Service { retryable: true, .. })
    }
}
