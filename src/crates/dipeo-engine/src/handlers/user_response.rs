//! `user_response` handler: pause for a human answer.
//!
//! Publishes an `INTERACTIVE_PROMPT` event, parks on the message router
//! until someone submits a response, then emits the answer. A timeout or
//! an aborted execution resolves the wait with the matching error kind.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::keys::{EVENT_BUS, MESSAGE_ROUTER};
use crate::request::ExecutionRequest;
use async_trait::async_trait;
use dipeo_domain::{payloads, EventType, ExecutionEvent, NodeType};
use serde_json::{json, Value};
use std::time::Duration;

pub struct UserResponseHandler;

#[async_trait]
impl NodeHandler for UserResponseHandler {
    fn node_type(&self) -> NodeType {
        NodeType::UserResponse
    }

    async fn run(&self, _inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, UserResponse);
        let bus = req.services.resolve(EVENT_BUS)?;
        let router = req.services.resolve(MESSAGE_ROUTER)?;

        let receiver = router.register_pending_prompt(req.execution_id.clone(), req.node.id.clone());
        bus.publish(ExecutionEvent::new(
            EventType::InteractivePrompt,
            req.execution_id.clone(),
            payloads::interactive_prompt(&req.node.id, &data.prompt, data.timeout),
        ));
        tracing::info!(node = %req.node.id, "waiting for interactive response");

        let timeout = Duration::from_secs(data.timeout.max(1));
        let answer = tokio::select! {
            _ = req.cancel.cancelled() => {
                router.cancel_pending_prompt(&req.execution_id, &req.node.id);
                return Err(EngineError::node_execution(
                    req.node.id.clone(),
                    "cancelled while waiting for user response",
                    "cancelled",
                ));
            }
            _ = tokio::time::sleep(timeout) => {
                router.cancel_pending_prompt(&req.execution_id, &req.node.id);
                return Err(EngineError::node_execution(
                    req.node.id.clone(),
                    format!("no user response within {}s", data.timeout),
                    "timeout",
                ));
            }
            received = receiver => match received {
                Ok(value) => value,
                Err(_) => {
                    return Err(EngineError::node_execution(
                        req.node.id.clone(),
                        "interactive prompt was cancelled",
                        "cancelled",
                    ));
                }
            }
        };

        bus.publish(ExecutionEvent::new(
            EventType::InteractiveResponse,
            req.execution_id.clone(),
            json!({"node_id": req.node.id, "response": answer}),
        ));
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::request_with_services;
    use dipeo_domain::UserResponseData;
    use dipeo_events::{EventBus, EventFilter, MessageRouter};
    use std::sync::Arc;

    fn user_response(timeout: u64) -> dipeo_domain::NodeData {
        dipeo_domain::NodeData::UserResponse(UserResponseData {
            prompt: "Proceed?".into(),
            timeout,
        })
    }

    #[tokio::test]
    async fn test_prompt_and_response_round_trip() {
        let bus = Arc::new(EventBus::new());
        let router = MessageRouter::new();
        let req = request_with_services(user_response(30), {
            let bus = bus.clone();
            let router = router.clone();
            move |services| {
                services.register(EVENT_BUS, bus);
                services.register(MESSAGE_ROUTER, router);
            }
        });
        let sub = bus.subscribe(EventFilter::of_types([EventType::InteractivePrompt]));

        let exec = req.execution_id.clone();
        let node = req.node.id.clone();
        let router_for_answer = router.clone();
        let answerer = tokio::spawn(async move {
            // wait for the prompt, then answer
            tokio::time::sleep(Duration::from_millis(20)).await;
            router_for_answer
                .submit_interactive_response(&exec, &node, json!("approved"))
                .unwrap();
        });

        let out = UserResponseHandler.run(json!({}), &req).await.unwrap();
        assert_eq!(out, json!("approved"));
        answerer.await.unwrap();

        let prompt_event = sub.try_recv().unwrap();
        assert_eq!(prompt_event.payload["prompt"], "Proceed?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_with_timeout_kind() {
        let bus = Arc::new(EventBus::new());
        let router = MessageRouter::new();
        let req = request_with_services(user_response(1), {
            let bus = bus.clone();
            let router = router.clone();
            move |services| {
                services.register(EVENT_BUS, bus);
                services.register(MESSAGE_ROUTER, router);
            }
        });
        let err = UserResponseHandler.run(json!({}), &req).await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }
}
