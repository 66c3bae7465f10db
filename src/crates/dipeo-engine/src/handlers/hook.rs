//! `hook` handler: fire a shell command or webhook with the node's inputs.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::keys::{API_INVOKER, PROCESS_RUNNER};
use crate::ports::{HttpRequest, ProcessSpec};
use crate::request::ExecutionRequest;
use async_trait::async_trait;
use dipeo_domain::{HookType, NodeData, NodeType};
use serde_json::{json, Value};
use std::time::Duration;

/// Inputs are handed to shell hooks through this environment variable.
pub const HOOK_INPUTS_ENV: &str = "DIPEO_HOOK_INPUTS";

pub struct HookHandler;

#[async_trait]
impl NodeHandler for HookHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Hook
    }

    fn validate(&self, req: &ExecutionRequest) -> std::result::Result<(), String> {
        if let NodeData::Hook(data) = &req.node.data {
            match data.hook_type {
                HookType::Shell if data.command.is_none() => {
                    return Err("shell hook requires a command".to_string())
                }
                HookType::Webhook if data.url.is_none() => {
                    return Err("webhook hook requires a url".to_string())
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, Hook);
        let timeout = data.timeout.map(Duration::from_secs);

        match data.hook_type {
            HookType::Shell => {
                let command = data.command.clone().unwrap_or_default();
                let runner = req.services.resolve(PROCESS_RUNNER)?;
                let mut env = data.env.clone();
                env.insert(HOOK_INPUTS_ENV.to_string(), serde_json::to_string(&inputs)?);

                let output = runner
                    .run(ProcessSpec {
                        program: "bash".to_string(),
                        args: vec!["-c".to_string(), command],
                        stdin: None,
                        env,
                        timeout,
                    })
                    .await?;
                if !output.is_success() {
                    return Err(EngineError::node_execution(
                        req.node.id.clone(),
                        format!("hook exited with status {}", output.exit_code),
                        "process",
                    ));
                }
                Ok(json!({"stdout": output.stdout.trim()}))
            }
            HookType::Webhook => {
                let url = data.url.clone().unwrap_or_default();
                let invoker = req.services.resolve(API_INVOKER)?;
                let response = invoker
                    .invoke(HttpRequest {
                        method: "POST".to_string(),
                        url,
                        body: Some(inputs),
                        timeout,
                        ..Default::default()
                    })
                    .await?;
                if !response.is_success() {
                    return Err(EngineError::node_execution(
                        req.node.id.clone(),
                        format!("webhook returned status {}", response.status),
                        "http",
                    ));
                }
                Ok(response.body)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::{json_response, MockApiInvoker, MockProcessRunner};
    use crate::ports::{ApiInvoker, ProcessRunner};
    use crate::testing::request_with_services;
    use dipeo_domain::HookData;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shell_hook_gets_inputs_in_env() {
        let runner = Arc::new(MockProcessRunner::succeeding_with("done"));
        let req = request_with_services(
            NodeData::Hook(HookData {
                hook_type: HookType::Shell,
                command: Some("notify.sh".into()),
                ..Default::default()
            }),
            {
                let runner = runner.clone();
                move |services| {
                    services.register(PROCESS_RUNNER, runner as Arc<dyn ProcessRunner>);
                }
            },
        );
        let out = HookHandler.run(json!({"event": "ok"}), &req).await.unwrap();
        assert_eq!(out["stdout"], "done");
        let specs = runner.specs.lock();
        assert!(specs[0].env[HOOK_INPUTS_ENV].contains("\"event\""));
    }

    #[tokio::test]
    async fn test_webhook_posts_inputs() {
        let invoker = Arc::new(MockApiInvoker::with_responses([json_response(
            200,
            json!({"received": true}),
        )]));
        let req = request_with_services(
            NodeData::Hook(HookData {
                hook_type: HookType::Webhook,
                url: Some("https://hooks.test/fire".into()),
                ..Default::default()
            }),
            {
                let invoker = invoker.clone();
                move |services| {
                    services.register(API_INVOKER, invoker as Arc<dyn ApiInvoker>);
                }
            },
        );
        let out = HookHandler.run(json!({"x": 1}), &req).await.unwrap();
        assert_eq!(out, json!({"received": true}));
        assert_eq!(invoker.requests.lock()[0].body, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_validate_requires_command_or_url() {
        let shell = request_with_services(NodeData::Hook(HookData::default()), |_| {});
        assert!(HookHandler.validate(&shell).is_err());
    }
}
