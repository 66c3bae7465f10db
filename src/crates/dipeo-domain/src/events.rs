//! Domain events published on the event bus.
//!
//! Every state change in an execution becomes one [`ExecutionEvent`].
//! Sequences are strictly monotonic per execution; there is no ordering
//! guarantee across executions.

use crate::enums::Status;
use crate::ids::{ExecutionId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ExecutionStarted,
    ExecutionUpdated,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionAborted,
    NodeStarted,
    NodeRunning,
    NodeCompleted,
    NodeFailed,
    NodeSkipped,
    NodePaused,
    MetricsCollected,
    InteractivePrompt,
    InteractiveResponse,
}

impl EventType {
    /// Wire string, identical to the subscription `event_type` field; the
    /// event-to-subscription mapping is lossless.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ExecutionStarted => "EXECUTION_STARTED",
            EventType::ExecutionUpdated => "EXECUTION_UPDATED",
            EventType::ExecutionCompleted => "EXECUTION_COMPLETED",
            EventType::ExecutionFailed => "EXECUTION_FAILED",
            EventType::ExecutionAborted => "EXECUTION_ABORTED",
            EventType::NodeStarted => "NODE_STARTED",
            EventType::NodeRunning => "NODE_RUNNING",
            EventType::NodeCompleted => "NODE_COMPLETED",
            EventType::NodeFailed => "NODE_FAILED",
            EventType::NodeSkipped => "NODE_SKIPPED",
            EventType::NodePaused => "NODE_PAUSED",
            EventType::MetricsCollected => "METRICS_COLLECTED",
            EventType::InteractivePrompt => "INTERACTIVE_PROMPT",
            EventType::InteractiveResponse => "INTERACTIVE_RESPONSE",
        }
    }

    pub fn is_execution_level(&self) -> bool {
        matches!(
            self,
            EventType::ExecutionStarted
                | EventType::ExecutionUpdated
                | EventType::ExecutionCompleted
                | EventType::ExecutionFailed
                | EventType::ExecutionAborted
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::ExecutionCompleted
                | EventType::ExecutionFailed
                | EventType::ExecutionAborted
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One domain event. `sequence` is assigned by the event bus at publish
/// time; publishers leave it at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub execution_id: ExecutionId,
    #[serde(default)]
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl ExecutionEvent {
    pub fn new(event_type: EventType, execution_id: ExecutionId, payload: Value) -> Self {
        Self {
            event_type,
            execution_id,
            sequence: 0,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Node ID carried in the payload, when this is a node-level event.
    pub fn node_id(&self) -> Option<NodeId> {
        self.payload
            .get("node_id")
            .and_then(Value::as_str)
            .map(NodeId::from)
    }

    /// Node or execution status carried in the payload.
    pub fn status(&self) -> Option<Status> {
        self.payload
            .get("status")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

/// Payload builders used by the scheduler and observers so that every
/// emitter shapes payloads the same way.
pub mod payloads {
    use super::*;
    use crate::execution::TokenUsage;
    use serde_json::json;

    pub fn execution_status(status: Status, error: Option<&str>) -> Value {
        json!({
            "status": status,
            "error": error,
        })
    }

    pub fn node_status(
        node_id: &NodeId,
        status: Status,
        error: Option<&str>,
        exec_count: u32,
    ) -> Value {
        json!({
            "node_id": node_id,
            "status": status,
            "error": error,
            "exec_count": exec_count,
        })
    }

    pub fn node_output(node_id: &NodeId, output: &Value, token_usage: Option<&TokenUsage>) -> Value {
        json!({
            "node_id": node_id,
            "output": output,
            "token_usage": token_usage,
        })
    }

    pub fn interactive_prompt(node_id: &NodeId, prompt: &str, timeout_seconds: u64) -> Value {
        json!({
            "node_id": node_id,
            "prompt": prompt,
            "timeout_seconds": timeout_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_wire_strings() {
        assert_eq!(EventType::NodeCompleted.as_str(), "NODE_COMPLETED");
        assert_eq!(
            serde_json::to_string(&EventType::ExecutionStarted).unwrap(),
            "\"EXECUTION_STARTED\""
        );
    }

    #[test]
    fn test_event_node_id_extraction() {
        let event = ExecutionEvent::new(
            EventType::NodeStarted,
            ExecutionId::new("exec_1"),
            payloads::node_status(&NodeId::new("n1"), Status::Running, None, 0),
        );
        assert_eq!(event.node_id(), Some(NodeId::new("n1")));
        assert_eq!(event.status(), Some(Status::Running));
    }

    #[test]
    fn test_terminal_classification() {
        assert!(EventType::ExecutionCompleted.is_terminal());
        assert!(!EventType::NodeCompleted.is_terminal());
        assert!(EventType::ExecutionAborted.is_execution_level());
    }

    #[test]
    fn test_event_serde_round_trip() {
        let event = ExecutionEvent::new(
            EventType::NodeFailed,
            ExecutionId::new("exec_2"),
            json!({"node_id": "n9", "error": "boom"}),
        );
        let s = serde_json::to_string(&event).unwrap();
        let back: ExecutionEvent = serde_json::from_str(&s).unwrap();
        assert_eq!(back, event);
    }
}
