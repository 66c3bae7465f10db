//! In-memory state repository.
//!
//! The default backend for tests and embedded runs. All operations are on
//! a `parking_lot`-locked map; no await points are held across the lock.

use crate::error::{Result, StateError};
use crate::ports::{ExecutionFilter, StateRepository};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dipeo_domain::{
    DiagramId, Envelope, ExecutionId, ExecutionState, NodeId, NodeState, Status, TokenUsage,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Default)]
pub struct InMemoryStateRepository {
    executions: RwLock<BTreeMap<ExecutionId, ExecutionState>>,
}

impl InMemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(
        &self,
        execution_id: &ExecutionId,
        f: impl FnOnce(&mut ExecutionState) -> R,
    ) -> Result<R> {
        let mut map = self.executions.write();
        let state = map
            .get_mut(execution_id)
            .ok_or_else(|| StateError::NotFound(execution_id.clone()))?;
        Ok(f(state))
    }
}

/// Shared status-transition bookkeeping used by every backend.
pub(crate) fn apply_status(state: &mut ExecutionState, status: Status, error: Option<String>) {
    let now = Utc::now();
    if status == Status::Running && state.started_at.is_none() {
        state.started_at = Some(now);
    }
    if status.is_terminal() {
        state.ended_at = Some(now);
    }
    state.status = status;
    if error.is_some() {
        state.error = error;
    }
}

pub(crate) fn apply_node_status(
    state: &mut ExecutionState,
    node_id: &NodeId,
    status: Status,
    error: Option<String>,
) {
    let now = Utc::now();
    let node = state
        .node_states
        .entry(node_id.clone())
        .or_insert_with(NodeState::default);
    if status == Status::Running {
        node.started_at = Some(now);
        node.ended_at = None;
        node.error = None;
    }
    if status.is_terminal() {
        node.ended_at = Some(now);
        if status == Status::Completed {
            node.exec_count += 1;
        }
    }
    node.status = status;
    if error.is_some() {
        node.error = error;
    }
}

pub(crate) fn apply_node_output(
    state: &mut ExecutionState,
    node_id: &NodeId,
    output: Envelope,
    token_usage: Option<TokenUsage>,
) {
    if let Some(tokens) = token_usage {
        let node = state
            .node_states
            .entry(node_id.clone())
            .or_insert_with(NodeState::default);
        node.token_usage.add(&tokens);
        state.token_usage.add(&tokens);
    }
    state.node_outputs.insert(node_id.clone(), output);
}

#[async_trait]
impl StateRepository for InMemoryStateRepository {
    async fn create_execution(
        &self,
        execution_id: ExecutionId,
        diagram_id: Option<DiagramId>,
        variables: BTreeMap<String, Value>,
    ) -> Result<ExecutionState> {
        let mut map = self.executions.write();
        if map.contains_key(&execution_id) {
            return Err(StateError::AlreadyExists(execution_id));
        }
        let state =
            ExecutionState::new(execution_id.clone(), diagram_id).with_variables(variables);
        map.insert(execution_id, state.clone());
        Ok(state)
    }

    async fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<ExecutionState>> {
        Ok(self.executions.read().get(execution_id).cloned())
    }

    async fn save_execution(&self, state: &ExecutionState) -> Result<()> {
        self.executions
            .write()
            .insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        execution_id: &ExecutionId,
        status: Status,
        error: Option<String>,
    ) -> Result<()> {
        self.with_state(execution_id, |state| apply_status(state, status, error))
    }

    async fn update_node_status(
        &self,
        execution_id: &ExecutionId,
        node_id: &NodeId,
        status: Status,
        error: Option<String>,
    ) -> Result<()> {
        self.with_state(execution_id, |state| {
            apply_node_status(state, node_id, status, error)
        })
    }

    async fn update_node_output(
        &self,
        execution_id: &ExecutionId,
        node_id: &NodeId,
        output: Envelope,
        token_usage: Option<TokenUsage>,
    ) -> Result<()> {
        self.with_state(execution_id, |state| {
            apply_node_output(state, node_id, output, token_usage)
        })
    }

    async fn add_token_usage(
        &self,
        execution_id: &ExecutionId,
        tokens: TokenUsage,
    ) -> Result<()> {
        self.with_state(execution_id, |state| state.token_usage.add(&tokens))
    }

    async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionState>> {
        let map = self.executions.read();
        let mut matched: Vec<ExecutionState> =
            map.values().filter(|s| filter.matches(s)).cloned().collect();
        // Most recent first.
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let limit = if filter.limit == 0 {
            usize::MAX
        } else {
            filter.limit
        };
        Ok(matched
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .collect())
    }

    async fn cleanup_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut map = self.executions.write();
        let before = map.len();
        map.retain(|_, s| {
            !(s.status.is_terminal() && s.ended_at.map(|t| t < cutoff).unwrap_or(false))
        });
        Ok(before - map.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exec_id(n: u32) -> ExecutionId {
        ExecutionId::new(format!("exec_{n}"))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = InMemoryStateRepository::new();
        let mut vars = BTreeMap::new();
        vars.insert("x".to_string(), json!(10));
        let state = repo
            .create_execution(exec_id(1), None, vars)
            .await
            .unwrap();
        assert_eq!(state.status, Status::Pending);
        assert_eq!(state.variables.get("x"), Some(&json!(10)));

        let fetched = repo.get_execution(&exec_id(1)).await.unwrap().unwrap();
        assert_eq!(fetched, state);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let repo = InMemoryStateRepository::new();
        repo.create_execution(exec_id(1), None, BTreeMap::new())
            .await
            .unwrap();
        let err = repo
            .create_execution(exec_id(1), None, BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_node_status_tracks_exec_count() {
        let repo = InMemoryStateRepository::new();
        repo.create_execution(exec_id(1), None, BTreeMap::new())
            .await
            .unwrap();
        let node = NodeId::new("n1");
        for _ in 0..3 {
            repo.update_node_status(&exec_id(1), &node, Status::Running, None)
                .await
                .unwrap();
            repo.update_node_status(&exec_id(1), &node, Status::Completed, None)
                .await
                .unwrap();
        }
        let state = repo.get_execution(&exec_id(1)).await.unwrap().unwrap();
        assert_eq!(state.node_states[&node].exec_count, 3);
    }

    #[tokio::test]
    async fn test_token_usage_aggregates() {
        let repo = InMemoryStateRepository::new();
        repo.create_execution(exec_id(1), None, BTreeMap::new())
            .await
            .unwrap();
        let node = NodeId::new("n1");
        let env = Envelope::text("out", node.clone(), exec_id(1));
        repo.update_node_output(&exec_id(1), &node, env, Some(TokenUsage::new(10, 20, 0)))
            .await
            .unwrap();
        let state = repo.get_execution(&exec_id(1)).await.unwrap().unwrap();
        assert_eq!(state.token_usage.total, 30);
        assert_eq!(state.node_states[&node].token_usage.total, 30);
        assert_eq!(
            state.aggregate_node_tokens().total,
            state.token_usage.total
        );
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let repo = InMemoryStateRepository::new();
        for n in 0..5 {
            repo.create_execution(exec_id(n), Some(DiagramId::new("d1")), BTreeMap::new())
                .await
                .unwrap();
        }
        repo.update_status(&exec_id(0), Status::Running, None)
            .await
            .unwrap();
        let running = repo
            .list_executions(&ExecutionFilter {
                status: Some(Status::Running),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(running.len(), 1);

        let paged = repo
            .list_executions(&ExecutionFilter {
                limit: 2,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paged.len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_execution_fails() {
        let repo = InMemoryStateRepository::new();
        let err = repo
            .update_status(&exec_id(9), Status::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }
}
