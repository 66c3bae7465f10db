//! Ports: the traits the engine consumes for all external effects.
//!
//! Concrete LLM, HTTP, filesystem, subprocess, and AST adapters live
//! behind these traits; handlers resolve them from the service registry.
//! Adapters rate-limit and retry internally where it makes sense and must
//! honor cancellation at their I/O boundaries.

pub mod local;
pub mod mock;

use crate::error::Result;
use async_trait::async_trait;
use dipeo_domain::{ApiKeyId, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One chat message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// A completion request against a person's configured model.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub service: String,
    pub model: String,
    pub api_key_id: Option<ApiKeyId>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub token_usage: TokenUsage,
    pub model: String,
}

#[async_trait]
pub trait LlmService: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// An outbound HTTP call.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 429 and 5xx responses are worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.status == 429 || (500..600).contains(&self.status)
    }
}

#[async_trait]
pub trait ApiInvoker: Send + Sync {
    async fn invoke(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Filesystem access for db, endpoint, template and diff handlers.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_to_string(&self, path: &Path) -> Result<String>;
    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    async fn append(&self, path: &Path, contents: &[u8]) -> Result<()>;
    async fn exists(&self, path: &Path) -> bool;
    async fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>>;
}

/// Subprocess execution for code jobs and shell hooks.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput>;
}

/// TypeScript source analysis for `typescript_ast` and `ir_builder` nodes.
pub trait AstParser: Send + Sync {
    /// Parse source into a declaration summary (interfaces, type aliases,
    /// enums, functions) as JSON.
    fn parse(&self, source: &str, include_jsdoc: bool) -> Result<Value>;
}
