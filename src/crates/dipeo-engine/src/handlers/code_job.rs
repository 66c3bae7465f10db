//! `code_job` handler: runs a script through the process-runner port.
//!
//! The contract with user code: inputs arrive as a JSON object on stdin,
//! the result goes to stdout. Stdout that parses as JSON is passed on
//! structurally; anything else becomes text. A non-zero exit fails the
//! node with the stderr tail in the message.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::keys::PROCESS_RUNNER;
use crate::ports::ProcessSpec;
use crate::request::ExecutionRequest;
use async_trait::async_trait;
use dipeo_domain::{CodeJobData, CodeLanguage, NodeData, NodeType};
use serde_json::Value;
use std::time::Duration;

pub struct CodeJobHandler;

impl CodeJobHandler {
    fn spec_for(data: &CodeJobData, inputs: &Value) -> Result<ProcessSpec> {
        let stdin = Some(serde_json::to_string(inputs)?);
        let timeout = data.timeout.map(Duration::from_secs);

        let (program, args) = match (data.language, &data.code, &data.file_path) {
            (CodeLanguage::Python, Some(code), _) => {
                ("python3".to_string(), vec!["-c".to_string(), code.clone()])
            }
            (CodeLanguage::Python, None, Some(path)) => {
                ("python3".to_string(), vec![path.clone()])
            }
            (CodeLanguage::Typescript, _, Some(path)) => (
                "npx".to_string(),
                vec!["tsx".to_string(), path.clone()],
            ),
            (CodeLanguage::Bash | CodeLanguage::Shell, Some(code), _) => {
                ("bash".to_string(), vec!["-c".to_string(), code.clone()])
            }
            (CodeLanguage::Bash | CodeLanguage::Shell, None, Some(path)) => {
                ("bash".to_string(), vec![path.clone()])
            }
            (CodeLanguage::Typescript, Some(_), None) => {
                return Err(EngineError::service(
                    "typescript code_job requires file_path; inline code is not supported",
                    false,
                ))
            }
            (_, None, None) => {
                return Err(EngineError::service(
                    "code_job requires either code or file_path",
                    false,
                ))
            }
        };

        Ok(ProcessSpec {
            program,
            args,
            stdin,
            env: Default::default(),
            timeout,
        })
    }
}

#[async_trait]
impl NodeHandler for CodeJobHandler {
    fn node_type(&self) -> NodeType {
        NodeType::CodeJob
    }

    fn validate(&self, req: &ExecutionRequest) -> std::result::Result<(), String> {
        if let NodeData::CodeJob(data) = &req.node.data {
            if data.code.is_none() && data.file_path.is_none() {
                return Err("code_job requires either code or file_path".to_string());
            }
        }
        Ok(())
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, CodeJob);
        let runner = req.services.resolve(PROCESS_RUNNER)?;
        let spec = Self::spec_for(data, &inputs)?;

        let output = req.cancel.guard(runner.run(spec)).await.ok_or_else(|| {
            EngineError::node_execution(req.node.id.clone(), "cancelled", "cancelled")
        })??;

        if !output.is_success() {
            let stderr_tail: String = output
                .stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(EngineError::node_execution(
                req.node.id.clone(),
                format!("exited with status {}: {stderr_tail}", output.exit_code),
                "process",
            ));
        }

        let stdout = output.stdout.trim();
        Ok(serde_json::from_str(stdout).unwrap_or_else(|_| Value::String(stdout.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::PROCESS_RUNNER;
    use crate::ports::mock::MockProcessRunner;
    use crate::ports::{ProcessOutput, ProcessRunner};
    use crate::testing::request_with_services;
    use serde_json::json;
    use std::sync::Arc;

    fn python_job(code: &str) -> NodeData {
        NodeData::CodeJob(CodeJobData {
            language: CodeLanguage::Python,
            code: Some(code.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_json_stdout_parsed() {
        let runner = Arc::new(MockProcessRunner::succeeding_with(r#"{"x": 1}"#));
        let req = request_with_services(python_job("print('{\"x\": 1}')"), |services| {
            services.register(PROCESS_RUNNER, runner.clone() as Arc<dyn ProcessRunner>);
        });
        let out = CodeJobHandler.run(json!({"seed": 1}), &req).await.unwrap();
        assert_eq!(out, json!({"x": 1}));

        // inputs travel on stdin
        let specs = runner.specs.lock();
        assert_eq!(specs[0].stdin.as_deref(), Some(r#"{"seed":1}"#));
        assert_eq!(specs[0].program, "python3");
    }

    #[tokio::test]
    async fn test_plain_stdout_becomes_text() {
        let runner = Arc::new(MockProcessRunner::succeeding_with("hello\n"));
        let req = request_with_services(python_job("print('hello')"), |services| {
            services.register(PROCESS_RUNNER, runner as Arc<dyn ProcessRunner>);
        });
        let out = CodeJobHandler.run(json!({}), &req).await.unwrap();
        assert_eq!(out, json!("hello"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_node() {
        let runner = Arc::new(MockProcessRunner::with_outputs([ProcessOutput {
            exit_code: 2,
            stdout: String::new(),
            stderr: "Traceback: boom".to_string(),
        }]));
        let req = request_with_services(python_job("raise"), |services| {
            services.register(PROCESS_RUNNER, runner as Arc<dyn ProcessRunner>);
        });
        let err = CodeJobHandler.run(json!({}), &req).await.unwrap_err();
        assert!(err.to_string().contains("status 2"));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_missing_code_and_file_rejected() {
        let req = request_with_services(
            NodeData::CodeJob(CodeJobData::default()),
            |_| {},
        );
        assert!(CodeJobHandler.validate(&req).is_err());
    }
}
