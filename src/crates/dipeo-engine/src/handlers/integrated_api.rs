//! `integrated_api` handler: provider/operation dispatch over the invoker.
//!
//! Providers are addressed by a base URL table; an operation becomes a
//! POST to `{base}/{operation}` with the node config and inputs merged
//! into the payload. Retries follow the node's `max_retries`.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::keys::API_INVOKER;
use crate::ports::HttpRequest;
use crate::request::ExecutionRequest;
use crate::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use dipeo_domain::{NodeData, NodeType};
use serde_json::{json, Value};
use std::time::Duration;

pub struct IntegratedApiHandler;

fn provider_base_url(provider: &str) -> String {
    match provider {
        "notion" => "https://api.notion.com/v1".to_string(),
        "slack" => "https://slack.com/api".to_string(),
        "github" => "https://api.github.com".to_string(),
        "jira" => "https://api.atlassian.com".to_string(),
        other => format!("https://{other}"),
    }
}

#[async_trait]
impl NodeHandler for IntegratedApiHandler {
    fn node_type(&self) -> NodeType {
        NodeType::IntegratedApi
    }

    fn validate(&self, req: &ExecutionRequest) -> std::result::Result<(), String> {
        if let NodeData::IntegratedApi(data) = &req.node.data {
            if data.provider.is_empty() || data.operation.is_empty() {
                return Err("integrated_api requires provider and operation".to_string());
            }
        }
        Ok(())
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, IntegratedApi);
        let invoker = req.services.resolve(API_INVOKER)?;

        let mut payload = serde_json::Map::new();
        for (k, v) in &data.config {
            payload.insert(k.clone(), v.clone());
        }
        if let Some(resource_id) = &data.resource_id {
            payload.insert("resource_id".to_string(), json!(resource_id));
        }
        if let Value::Object(input_map) = inputs {
            for (k, v) in input_map {
                payload.insert(k, v);
            }
        }

        let request = HttpRequest {
            method: "POST".to_string(),
            url: format!(
                "{}/{}",
                provider_base_url(&data.provider),
                data.operation.trim_start_matches('/')
            ),
            body: Some(Value::Object(payload)),
            timeout: data.timeout.map(Duration::from_secs),
            ..Default::default()
        };

        let policy = RetryPolicy {
            max_attempts: data.max_retries.max(1),
            ..Default::default()
        };
        let response = retry_with_backoff(&policy, &req.cancel, || {
            let invoker = invoker.clone();
            let request = request.clone();
            async move {
                let response = invoker.invoke(request).await?;
                if response.is_retryable() {
                    return Err(EngineError::service(
                        format!("provider status {}", response.status),
                        true,
                    ));
                }
                Ok(response)
            }
        })
        .await?;

        if !response.is_success() {
            return Err(EngineError::node_execution(
                req.node.id.clone(),
                format!(
                    "{}/{} returned status {}",
                    data.provider, data.operation, response.status
                ),
                "http",
            ));
        }
        Ok(response.body)
    }
}
