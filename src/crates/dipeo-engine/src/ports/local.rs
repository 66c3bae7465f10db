//! Default local adapters: tokio filesystem, tokio subprocesses, reqwest
//! HTTP, and a regex-based TypeScript declaration scanner.

use super::{
    ApiInvoker, AstParser, FileSystem, HttpRequest, HttpResponse, ProcessOutput, ProcessRunner,
    ProcessSpec,
};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Plain `tokio::fs` adapter rooted at the process working directory.
#[derive(Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read_to_string(&self, path: &Path) -> Result<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::write(path, contents).await?)
    }

    async fn append(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(contents).await?;
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let pattern = pattern.to_string();
        let paths = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
            let mut out = Vec::new();
            for entry in glob::glob(&pattern)
                .map_err(|e| EngineError::service(format!("bad glob pattern: {e}"), false))?
            {
                match entry {
                    Ok(p) => out.push(p),
                    Err(e) => {
                        tracing::warn!(error = %e, "unreadable glob entry skipped");
                    }
                }
            }
            out.sort();
            Ok(out)
        })
        .await
        .map_err(|e| EngineError::service(format!("glob task failed: {e}"), false))??;
        Ok(paths)
    }
}

/// Subprocess runner on `tokio::process` with wall-clock timeout.
#[derive(Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput> {
        let mut command = tokio::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| EngineError::service(format!("spawn '{}': {e}", spec.program), false))?;

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                drop(stdin);
            }
        }

        let wait = child.wait_with_output();
        let output = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| EngineError::Timeout(limit))??,
            None => wait.await?,
        };

        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// HTTP invoker on `reqwest`. One shared client; per-request timeouts.
pub struct ReqwestApiInvoker {
    client: reqwest::Client,
}

impl Default for ReqwestApiInvoker {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl ReqwestApiInvoker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiInvoker for ReqwestApiInvoker {
    async fn invoke(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method: reqwest::Method = request
            .method
            .parse()
            .map_err(|_| EngineError::service(format!("bad method '{}'", request.method), false))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .query(&request.query)
            .timeout(request.timeout.unwrap_or(Duration::from_secs(30)));
        for (k, v) in &request.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            // Connect/timeout failures are transient; the handler decides.
            EngineError::service(format!("http request failed: {e}"), true)
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| EngineError::service(format!("http body read failed: {e}"), true))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(HttpResponse { status, body })
    }
}

/// Regex-based TypeScript declaration scanner.
///
/// Good enough for the node-spec and codegen sources this runtime feeds
/// it: it extracts interface/type/enum/function declarations with their
/// bodies, not a full grammar. A real parser can be swapped in behind the
/// same port.
#[derive(Default)]
pub struct RegexAstParser;

impl AstParser for RegexAstParser {
    fn parse(&self, source: &str, include_jsdoc: bool) -> Result<Value> {
        let interface_re =
            Regex::new(r"(?m)^\s*(?:export\s+)?interface\s+(\w+)(?:\s+extends\s+([\w,\s]+))?")
                .map_err(|e| EngineError::service(e.to_string(), false))?;
        let type_re = Regex::new(r"(?m)^\s*(?:export\s+)?type\s+(\w+)\s*=")
            .map_err(|e| EngineError::service(e.to_string(), false))?;
        let enum_re = Regex::new(r"(?m)^\s*(?:export\s+)?(?:const\s+)?enum\s+(\w+)")
            .map_err(|e| EngineError::service(e.to_string(), false))?;
        let function_re =
            Regex::new(r"(?m)^\s*(?:export\s+)?(?:async\s+)?function\s+(\w+)\s*\(")
                .map_err(|e| EngineError::service(e.to_string(), false))?;
        let jsdoc_re = Regex::new(r"/\*\*[^*]*(?:\*[^/][^*]*)*\*/")
            .map_err(|e| EngineError::service(e.to_string(), false))?;

        let interfaces: Vec<Value> = interface_re
            .captures_iter(source)
            .map(|c| {
                json!({
                    "name": &c[1],
                    "extends": c.get(2).map(|m| m.as_str().trim()),
                })
            })
            .collect();
        let type_aliases: Vec<Value> = type_re
            .captures_iter(source)
            .map(|c| json!({"name": &c[1]}))
            .collect();
        let enums: Vec<Value> = enum_re
            .captures_iter(source)
            .map(|c| json!({"name": &c[1]}))
            .collect();
        let functions: Vec<Value> = function_re
            .captures_iter(source)
            .map(|c| json!({"name": &c[1]}))
            .collect();

        let mut out = json!({
            "interfaces": interfaces,
            "type_aliases": type_aliases,
            "enums": enums,
            "functions": functions,
        });
        if include_jsdoc {
            let docs: Vec<String> = jsdoc_re
                .find_iter(source)
                .map(|m| m.as_str().to_string())
                .collect();
            out["jsdoc"] = json!(docs);
        }
        Ok(out)
    }
}
