//! Compiler error types.

use dipeo_domain::DomainError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Error, Debug)]
pub enum CompileError {
    /// The diagram failed a structural invariant. Never reaches runtime.
    #[error("diagram validation failed: {0}")]
    Validation(String),

    /// A handle reference could not be resolved.
    #[error("handle resolution failed: {0}")]
    Handle(String),

    /// The diagram contains a cycle with no iteration bound.
    #[error("unbounded cycle through nodes [{nodes}]: a cycle must pass through a condition node or an iteration-bounded node")]
    UnboundedCycle { nodes: String },

    /// A `prompt_file` reference could not be read.
    #[error("failed to read prompt file '{path}': {source}")]
    PromptFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl CompileError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn handle(msg: impl Into<String>) -> Self {
        Self::Handle(msg.into())
    }
}
