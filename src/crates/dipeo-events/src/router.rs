//! Message router.
//!
//! A singleton that fans wire frames out to per-execution subscriber sets:
//! WebSocket connections, CLI displays, anything that registered a sender.
//! A connection whose channel is gone is pruned on the next send. The
//! router also tracks CLI sessions and routes interactive responses back
//! to the waiting handler.

use crate::error::{EventError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dipeo_domain::{ExecutionEvent, ExecutionId, NodeId};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// The wire frame every subscriber receives. Lossless per event type: the
/// `event_type` string is exactly the internal enum's wire form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionFrame {
    pub execution_id: ExecutionId,
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

impl SubscriptionFrame {
    pub fn from_event(event: &ExecutionEvent) -> Self {
        Self {
            execution_id: event.execution_id.clone(),
            event_type: event.event_type.as_str().to_string(),
            data: event.payload.clone(),
            timestamp: event.timestamp,
            sequence: event.sequence,
        }
    }
}

/// A registered CLI session binding an external process to an execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CliSession {
    pub execution_id: ExecutionId,
    pub diagram_name: String,
    pub diagram_format: String,
    pub started_at: DateTime<Utc>,
}

type FrameSender = mpsc::UnboundedSender<SubscriptionFrame>;

#[derive(Default)]
pub struct MessageRouter {
    /// connection id -> frame sender
    connections: DashMap<String, FrameSender>,
    /// execution id -> subscribed connection ids
    subscriptions: DashMap<ExecutionId, BTreeSet<String>>,
    /// execution id -> active CLI session
    cli_sessions: DashMap<ExecutionId, CliSession>,
    /// (execution, node) -> waiting interactive prompt
    pending_prompts: DashMap<(ExecutionId, NodeId), oneshot::Sender<Value>>,
}

impl MessageRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a connection, returning the receiving end of its frame
    /// stream.
    pub fn register_connection(
        &self,
        connection_id: impl Into<String>,
    ) -> mpsc::UnboundedReceiver<SubscriptionFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(connection_id.into(), tx);
        rx
    }

    pub fn unregister_connection(&self, connection_id: &str) {
        self.connections.remove(connection_id);
        for mut entry in self.subscriptions.iter_mut() {
            entry.value_mut().remove(connection_id);
        }
    }

    pub fn subscribe_connection_to_execution(
        &self,
        connection_id: &str,
        execution_id: ExecutionId,
    ) -> Result<()> {
        if !self.connections.contains_key(connection_id) {
            return Err(EventError::UnknownConnection(connection_id.to_string()));
        }
        self.subscriptions
            .entry(execution_id)
            .or_default()
            .insert(connection_id.to_string());
        Ok(())
    }

    pub fn unsubscribe_connection_from_execution(
        &self,
        connection_id: &str,
        execution_id: &ExecutionId,
    ) {
        if let Some(mut set) = self.subscriptions.get_mut(execution_id) {
            set.remove(connection_id);
        }
    }

    /// Forward a frame to every subscriber of its execution. Connections
    /// whose receiver is gone are removed; returns how many were reached.
    pub fn broadcast_to_execution(&self, frame: SubscriptionFrame) -> usize {
        let Some(subscriber_ids) = self
            .subscriptions
            .get(&frame.execution_id)
            .map(|s| s.clone())
        else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead: Vec<String> = Vec::new();
        for id in subscriber_ids {
            match self.connections.get(&id) {
                Some(tx) if tx.send(frame.clone()).is_ok() => delivered += 1,
                _ => dead.push(id),
            }
        }
        for id in dead {
            tracing::debug!(connection_id = %id, "removing disconnected subscriber");
            self.unregister_connection(&id);
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // --- CLI sessions ---------------------------------------------------

    pub fn register_cli_session(
        &self,
        execution_id: ExecutionId,
        diagram_name: impl Into<String>,
        diagram_format: impl Into<String>,
    ) {
        let session = CliSession {
            execution_id: execution_id.clone(),
            diagram_name: diagram_name.into(),
            diagram_format: diagram_format.into(),
            started_at: Utc::now(),
        };
        self.cli_sessions.insert(execution_id, session);
    }

    pub fn unregister_cli_session(&self, execution_id: &ExecutionId) {
        self.cli_sessions.remove(execution_id);
    }

    /// The most recently started CLI session, if any.
    pub fn active_cli_session(&self) -> Option<CliSession> {
        self.cli_sessions
            .iter()
            .map(|e| e.value().clone())
            .max_by_key(|s| s.started_at)
    }

    // --- Interactive prompts --------------------------------------------

    /// Register a pending prompt; the returned receiver resolves when a
    /// response is submitted.
    pub fn register_pending_prompt(
        &self,
        execution_id: ExecutionId,
        node_id: NodeId,
    ) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending_prompts.insert((execution_id, node_id), tx);
        rx
    }

    pub fn cancel_pending_prompt(&self, execution_id: &ExecutionId, node_id: &NodeId) {
        self.pending_prompts
            .remove(&(execution_id.clone(), node_id.clone()));
    }

    /// Route a user's answer back to the waiting `user_response` handler.
    pub fn submit_interactive_response(
        &self,
        execution_id: &ExecutionId,
        node_id: &NodeId,
        value: Value,
    ) -> Result<()> {
        let (_, tx) = self
            .pending_prompts
            .remove(&(execution_id.clone(), node_id.clone()))
            .ok_or_else(|| EventError::NoPendingPrompt {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
            })?;
        // The handler may have timed out and dropped its receiver; that is
        // not the submitter's problem.
        let _ = tx.send(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dipeo_domain::EventType;
    use serde_json::json;

    fn frame(exec: &str, seq: u64) -> SubscriptionFrame {
        SubscriptionFrame {
            execution_id: ExecutionId::new(exec),
            event_type: EventType::ExecutionUpdated.as_str().to_string(),
            data: json!({}),
            timestamp: Utc::now(),
            sequence: seq,
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let router = MessageRouter::new();
        let mut rx = router.register_connection("conn_1");
        router
            .subscribe_connection_to_execution("conn_1", ExecutionId::new("exec_1"))
            .unwrap();

        let delivered = router.broadcast_to_execution(frame("exec_1", 1));
        assert_eq!(delivered, 1);
        let got = rx.recv().await.unwrap();
        assert_eq!(got.sequence, 1);
    }

    #[tokio::test]
    async fn test_broadcast_skips_other_executions() {
        let router = MessageRouter::new();
        let mut rx = router.register_connection("conn_1");
        router
            .subscribe_connection_to_execution("conn_1", ExecutionId::new("exec_1"))
            .unwrap();
        assert_eq!(router.broadcast_to_execution(frame("exec_2", 1)), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_connection_removed_on_send() {
        let router = MessageRouter::new();
        let rx = router.register_connection("conn_1");
        router
            .subscribe_connection_to_execution("conn_1", ExecutionId::new("exec_1"))
            .unwrap();
        drop(rx);
        assert_eq!(router.broadcast_to_execution(frame("exec_1", 1)), 0);
        assert_eq!(router.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_connection_fails() {
        let router = MessageRouter::new();
        let err = router
            .subscribe_connection_to_execution("ghost", ExecutionId::new("exec_1"))
            .unwrap_err();
        assert!(matches!(err, EventError::UnknownConnection(_)));
    }

    #[tokio::test]
    async fn test_cli_session_lifecycle() {
        let router = MessageRouter::new();
        router.register_cli_session(ExecutionId::new("exec_1"), "flow", "light");
        let active = router.active_cli_session().unwrap();
        assert_eq!(active.diagram_name, "flow");
        router.unregister_cli_session(&ExecutionId::new("exec_1"));
        assert!(router.active_cli_session().is_none());
    }

    #[tokio::test]
    async fn test_interactive_response_round_trip() {
        let router = MessageRouter::new();
        let exec = ExecutionId::new("exec_1");
        let node = NodeId::new("ask");
        let rx = router.register_pending_prompt(exec.clone(), node.clone());
        router
            .submit_interactive_response(&exec, &node, json!("yes"))
            .unwrap();
        assert_eq!(rx.await.unwrap(), json!("yes"));

        let err = router
            .submit_interactive_response(&exec, &node, json!("again"))
            .unwrap_err();
        assert!(matches!(err, EventError::NoPendingPrompt { .. }));
    }
}
