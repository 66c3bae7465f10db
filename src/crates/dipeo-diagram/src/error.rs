//! Diagram format error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiagramError>;

#[derive(Error, Debug)]
pub enum DiagramError {
    /// Content matched no format with enough confidence.
    #[error("could not detect diagram format")]
    UnknownFormat,

    /// The format name was not one of `native`, `light`, `readable`.
    #[error("unknown format name '{0}'")]
    UnknownFormatName(String),

    /// Structured content failed the format's shape expectations.
    #[error("{format} diagram parse failed: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    /// A connection referenced an unknown node label or invalid handle.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Domain(#[from] dipeo_domain::DomainError),
}

impl DiagramError {
    pub fn parse(format: &'static str, message: impl Into<String>) -> Self {
        Self::Parse {
            format,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }
}
