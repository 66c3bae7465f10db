//! `api_job` handler: one HTTP call through the invoker port, with
//! transient failures (connect errors, 429, 5xx) retried inside the
//! handler where the engine never sees them.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::keys::API_INVOKER;
use crate::ports::HttpRequest;
use crate::request::ExecutionRequest;
use crate::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use dipeo_domain::{meta_keys, ApiJobData, AuthType, Envelope, HttpMethod, NodeData, NodeType};
use serde_json::{json, Value};
use std::time::Duration;

pub struct ApiJobHandler;

impl ApiJobHandler {
    fn method_str(method: HttpMethod) -> &'static str {
        match method {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Auth tokens are referenced, never inlined: the ref resolves against
    /// execution variables first, then the process environment.
    fn resolve_token(req: &ExecutionRequest, token_ref: &str) -> Option<String> {
        if let Some(value) = req.variables.get(token_ref).and_then(Value::as_str) {
            return Some(value.to_string());
        }
        std::env::var(token_ref).ok()
    }

    fn build_request(data: &ApiJobData, req: &ExecutionRequest) -> Result<HttpRequest> {
        let mut headers = data.headers.clone();
        match data.auth_type {
            AuthType::None => {}
            AuthType::Bearer | AuthType::Basic | AuthType::ApiKey => {
                let token_ref = data.auth_token_ref.as_deref().ok_or_else(|| {
                    EngineError::node_execution(
                        req.node.id.clone(),
                        "auth_type requires auth_token_ref",
                        "validation",
                    )
                })?;
                let token = Self::resolve_token(req, token_ref).ok_or_else(|| {
                    EngineError::node_execution(
                        req.node.id.clone(),
                        format!("auth token ref '{token_ref}' did not resolve"),
                        "configuration",
                    )
                })?;
                match data.auth_type {
                    AuthType::Bearer => {
                        headers.insert("Authorization".into(), format!("Bearer {token}"));
                    }
                    AuthType::Basic => {
                        headers.insert("Authorization".into(), format!("Basic {token}"));
                    }
                    AuthType::ApiKey => {
                        headers.insert("X-Api-Key".into(), token);
                    }
                    AuthType::None => unreachable!(),
                }
            }
        }

        Ok(HttpRequest {
            method: Self::method_str(data.method).to_string(),
            url: data.url.clone(),
            headers,
            query: data.params.clone(),
            body: data.body.clone(),
            timeout: data.timeout.map(Duration::from_secs),
        })
    }
}

#[async_trait]
impl NodeHandler for ApiJobHandler {
    fn node_type(&self) -> NodeType {
        NodeType::ApiJob
    }

    fn validate(&self, req: &ExecutionRequest) -> std::result::Result<(), String> {
        if let NodeData::ApiJob(data) = &req.node.data {
            if data.url.is_empty() {
                return Err("api_job requires a url".to_string());
            }
        }
        Ok(())
    }

    async fn run(&self, _inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, ApiJob);
        let invoker = req.services.resolve(API_INVOKER)?;
        let http_request = Self::build_request(data, req)?;

        let policy = RetryPolicy::default();
        let response = retry_with_backoff(&policy, &req.cancel, || {
            let invoker = invoker.clone();
            let request = http_request.clone();
            async move {
                let response = invoker.invoke(request).await?;
                if response.is_retryable() {
                    return Err(EngineError::service(
                        format!("http status {}", response.status),
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
                format!("http status {}: {}", response.status, response.body),
                "http",
            ));
        }

        Ok(json!({"status": response.status, "body": response.body}))
    }

    fn serialize_output(&self, result: Value, req: &ExecutionRequest) -> Result<Envelope> {
        let status = result.get("status").cloned().unwrap_or(Value::Null);
        let body = result.get("body").cloned().unwrap_or(Value::Null);
        Ok(
            Envelope::json(body, req.node.id.clone(), req.execution_id.clone())
                .with_meta("http_status", status)
                .with_meta(meta_keys::OUTPUT_LABEL, json!("default")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::run_lifecycle;
    use crate::keys::API_INVOKER;
    use crate::ports::mock::{json_response, MockApiInvoker};
    use crate::ports::ApiInvoker;
    use crate::request::Inputs;
    use crate::testing::request_with_services;
    use std::sync::Arc;

    fn api_job(url: &str) -> NodeData {
        NodeData::ApiJob(ApiJobData {
            url: url.to_string(),
            method: HttpMethod::Post,
            body: Some(json!({"q": 1})),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_success_returns_body_envelope() {
        let invoker = Arc::new(MockApiInvoker::with_responses([json_response(
            200,
            json!({"ok": true}),
        )]));
        let req = request_with_services(api_job("https://api.test/x"), |services| {
            services.register(API_INVOKER, invoker.clone() as Arc<dyn ApiInvoker>);
        });
        let envelope = run_lifecycle(&ApiJobHandler, &req, &Inputs::new())
            .await
            .unwrap();
        assert_eq!(envelope.as_json().unwrap(), &json!({"ok": true}));
        assert_eq!(envelope.meta.get("http_status"), Some(&json!(200)));
        assert_eq!(invoker.requests.lock()[0].method, "POST");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_on_5xx_then_succeeds() {
        let invoker = Arc::new(MockApiInvoker::with_responses([
            json_response(503, json!("unavailable")),
            json_response(200, json!({"ok": true})),
        ]));
        let req = request_with_services(api_job("https://api.test/x"), |services| {
            services.register(API_INVOKER, invoker.clone() as Arc<dyn ApiInvoker>);
        });
        let out = ApiJobHandler.run(json!({}), &req).await.unwrap();
        assert_eq!(out["status"], 200);
        assert_eq!(invoker.requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_4xx_fails_without_retry() {
        let invoker = Arc::new(MockApiInvoker::with_responses([json_response(
            404,
            json!("missing"),
        )]));
        let req = request_with_services(api_job("https://api.test/x"), |services| {
            services.register(API_INVOKER, invoker.clone() as Arc<dyn ApiInvoker>);
        });
        let err = ApiJobHandler.run(json!({}), &req).await.unwrap_err();
        assert!(err.to_string().contains("404"));
        assert_eq!(invoker.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_bearer_auth_header_from_variables() {
        let invoker = Arc::new(MockApiInvoker::with_responses([json_response(
            200,
            json!({}),
        )]));
        let mut req = request_with_services(
            NodeData::ApiJob(ApiJobData {
                url: "https://api.test/secure".into(),
                auth_type: AuthType::Bearer,
                auth_token_ref: Some("MY_TOKEN".into()),
                ..Default::default()
            }),
            |services| {
                services.register(API_INVOKER, invoker.clone() as Arc<dyn ApiInvoker>);
            },
        );
        req.variables.insert("MY_TOKEN".into(), json!("s3cret"));
        ApiJobHandler.run(json!({}), &req).await.unwrap();
        assert_eq!(
            invoker.requests.lock()[0].headers.get("Authorization"),
            Some(&"Bearer s3cret".to_string())
        );
    }
}
