//! Mock port implementations for tests and dry runs.

use super::{
    ApiInvoker, FileSystem, HttpRequest, HttpResponse, LlmRequest, LlmResponse, LlmService,
    ProcessOutput, ProcessRunner, ProcessSpec,
};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use dipeo_domain::TokenUsage;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

/// LLM that replays scripted responses in order, then echoes the last
/// user message.
#[derive(Default)]
pub struct MockLlm {
    responses: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl LlmService for MockLlm {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let scripted = self.responses.lock().pop_front();
        let text = scripted.unwrap_or_else(|| {
            request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == "user")
                .map(|m| format!("echo: {}", m.content))
                .unwrap_or_else(|| "echo".to_string())
        });
        let model = request.model.clone();
        self.calls.lock().push(request);
        Ok(LlmResponse {
            text,
            token_usage: TokenUsage::new(10, 5, 0),
            model,
        })
    }
}

/// Process runner that maps program names to canned outputs.
#[derive(Default)]
pub struct MockProcessRunner {
    outputs: Mutex<VecDeque<ProcessOutput>>,
    pub specs: Mutex<Vec<ProcessSpec>>,
}

impl MockProcessRunner {
    pub fn with_outputs(outputs: impl IntoIterator<Item = ProcessOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into_iter().collect()),
            specs: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding_with(stdout: impl Into<String>) -> Self {
        Self::with_outputs([ProcessOutput {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }])
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput> {
        self.specs.lock().push(spec);
        self.outputs.lock().pop_front().ok_or_else(|| {
            EngineError::service("mock process runner has no scripted output", false)
        })
    }
}

/// API invoker replaying scripted responses.
#[derive(Default)]
pub struct MockApiInvoker {
    responses: Mutex<VecDeque<HttpResponse>>,
    pub requests: Mutex<Vec<HttpRequest>>,
}

impl MockApiInvoker {
    pub fn with_responses(responses: impl IntoIterator<Item = HttpResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ApiInvoker for MockApiInvoker {
    async fn invoke(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| EngineError::service("mock invoker has no scripted response", false))
    }
}

/// In-memory filesystem keyed by path.
#[derive(Default)]
pub struct MemoryFileSystem {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

impl MemoryFileSystem {
    pub fn with_files(
        files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>,
    ) -> Self {
        Self {
            files: Mutex::new(
                files
                    .into_iter()
                    .map(|(p, c)| (p.into(), c.into()))
                    .collect(),
            ),
        }
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .get(path.as_ref())
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn read_to_string(&self, path: &Path) -> Result<String> {
        self.files
            .lock()
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or_else(|| {
                EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such file: {}", path.display()),
                ))
            })
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.files
            .lock()
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    async fn append(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.files
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(contents);
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| EngineError::service(format!("bad glob pattern: {e}"), false))?;
        Ok(self
            .files
            .lock()
            .keys()
            .filter(|p| matcher.matches_path(p))
            .cloned()
            .collect())
    }
}

/// Helper for handler tests that only need a JSON response.
pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse { status, body }
}
