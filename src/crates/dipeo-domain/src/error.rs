//! Domain-level error types.
//!
//! Errors raised by the pure domain model: handle algebra failures,
//! envelope content-type mismatches, and structural diagram violations.
//! Runtime crates define their own error enums and convert from these
//! via `#[from]`.

use thiserror::Error;

/// Convenience result type using [`DomainError`].
pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    /// A handle ID could not be parsed or referenced an unknown handle.
    #[error("handle error: {0}")]
    Handle(String),

    /// An envelope was accessed with the wrong content type.
    #[error("envelope content type mismatch: expected {expected}, got {actual}")]
    ContentTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A diagram failed a structural invariant.
    #[error("diagram validation failed: {0}")]
    Validation(String),

    /// A string did not name a known closed-enum variant.
    #[error("unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub fn handle(msg: impl Into<String>) -> Self {
        Self::Handle(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unknown_variant(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.into(),
        }
    }
}
