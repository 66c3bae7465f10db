//! The composed state service.
//!
//! Write-through cache over a durable repository: everything during a run
//! goes to the cache; the terminal transition flushes to the repository
//! and evicts. Reads try the cache first and fall back to the repository,
//! so subscriptions keep working after an execution finishes.

use crate::error::{Result, StateError};
use crate::memory::{apply_node_output, apply_node_status, apply_status};
use crate::ports::{ExecutionCache, ExecutionFilter, StateRepository};
use dipeo_domain::{
    DiagramId, Envelope, EventType, ExecutionEvent, ExecutionId, ExecutionState, NodeId, Status,
    TokenUsage,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct StateService {
    cache: Arc<dyn ExecutionCache>,
    repo: Arc<dyn StateRepository>,
}

impl StateService {
    pub fn new(cache: Arc<dyn ExecutionCache>, repo: Arc<dyn StateRepository>) -> Self {
        Self { cache, repo }
    }

    /// Create the execution record in the cache and mark it running.
    pub async fn start_execution(
        &self,
        execution_id: ExecutionId,
        diagram_id: Option<DiagramId>,
        variables: BTreeMap<String, Value>,
    ) -> Result<ExecutionState> {
        self.cache
            .create_in_cache(execution_id.clone(), diagram_id, variables)
            .await?;
        self.cache
            .mutate(
                &execution_id,
                Box::new(|state| apply_status(state, Status::Running, None)),
            )
            .await?;
        self.cache
            .get_cached(&execution_id)
            .await
            .ok_or(StateError::NotFound(execution_id))
    }

    /// Non-terminal status change (pause/resume) on the live record.
    pub async fn update_status(
        &self,
        execution_id: &ExecutionId,
        status: Status,
        error: Option<String>,
    ) -> Result<()> {
        self.cache
            .mutate(
                execution_id,
                Box::new(move |state| apply_status(state, status, error)),
            )
            .await
    }

    /// Apply the terminal status, flush to the durable repository, evict.
    pub async fn finish_execution(
        &self,
        execution_id: &ExecutionId,
        status: Status,
        error: Option<String>,
    ) -> Result<ExecutionState> {
        self.cache
            .mutate(
                execution_id,
                Box::new(move |state| apply_status(state, status, error)),
            )
            .await?;
        self.cache.persist_final_state(execution_id).await
    }

    /// Seed `PENDING` entries for every node of the diagram so readers see
    /// the full map from the first snapshot.
    pub async fn seed_node_states(
        &self,
        execution_id: &ExecutionId,
        node_ids: Vec<NodeId>,
    ) -> Result<()> {
        self.cache
            .mutate(
                execution_id,
                Box::new(move |state| {
                    for node_id in node_ids {
                        state.node_states.entry(node_id).or_default();
                    }
                }),
            )
            .await
    }

    pub async fn update_node_status(
        &self,
        execution_id: &ExecutionId,
        node_id: &NodeId,
        status: Status,
        error: Option<String>,
    ) -> Result<()> {
        let node_id = node_id.clone();
        self.cache
            .mutate(
                execution_id,
                Box::new(move |state| apply_node_status(state, &node_id, status, error)),
            )
            .await
    }

    /// Record a node's output envelope and status in one write.
    pub async fn update_node_execution(
        &self,
        execution_id: &ExecutionId,
        node_id: &NodeId,
        output: Envelope,
        status: Status,
        token_usage: Option<TokenUsage>,
        error: Option<String>,
    ) -> Result<()> {
        let node_id = node_id.clone();
        self.cache
            .mutate(
                execution_id,
                Box::new(move |state| {
                    apply_node_output(state, &node_id, output, token_usage);
                    apply_node_status(state, &node_id, status, error);
                }),
            )
            .await
    }

    pub async fn append_token_usage(
        &self,
        execution_id: &ExecutionId,
        tokens: TokenUsage,
    ) -> Result<()> {
        self.cache
            .mutate(
                execution_id,
                Box::new(move |state| state.token_usage.add(&tokens)),
            )
            .await
    }

    pub async fn update_variables(
        &self,
        execution_id: &ExecutionId,
        variables: BTreeMap<String, Value>,
    ) -> Result<()> {
        self.cache
            .mutate(
                execution_id,
                Box::new(move |state| state.variables.extend(variables)),
            )
            .await
    }

    /// Cache first, durable repository second.
    pub async fn get_execution_state(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<ExecutionState>> {
        if let Some(state) = self.cache.get_cached(execution_id).await {
            return Ok(Some(state));
        }
        self.repo.get_execution(execution_id).await
    }

    /// Durable listings plus anything still live; live entries win.
    pub async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionState>> {
        self.repo.list_executions(filter).await
    }

    /// Materialize an event into state. Used by the state-store observer so
    /// the persisted record always agrees with the event stream. Node events
    /// carry authoritative `status` and `exec_count` values, so applying an
    /// event the scheduler already wrote directly is a no-op rather than a
    /// double count. Events for evicted executions are ignored.
    pub async fn apply_event(&self, event: &ExecutionEvent) -> Result<()> {
        let execution_id = &event.execution_id;
        let error = event
            .payload
            .get("error")
            .and_then(Value::as_str)
            .map(String::from);

        let result = match event.event_type {
            EventType::NodeStarted | EventType::NodeRunning => match event.node_id() {
                Some(node_id) => {
                    self.set_node_state(execution_id, &node_id, Status::Running, None, None)
                        .await
                }
                None => Ok(()),
            },
            EventType::NodeCompleted
            | EventType::NodeFailed
            | EventType::NodeSkipped
            | EventType::NodePaused => match (event.node_id(), event.status()) {
                (Some(node_id), Some(status)) => {
                    let exec_count = event
                        .payload
                        .get("exec_count")
                        .and_then(Value::as_u64)
                        .map(|n| n as u32);
                    self.set_node_state(execution_id, &node_id, status, error, exec_count)
                        .await
                }
                _ => Ok(()),
            },
            // Execution-level transitions are written by the scheduler
            // itself; the rest carry no state.
            _ => Ok(()),
        };

        match result {
            Err(StateError::NotFound(_)) => {
                tracing::debug!(execution_id = %execution_id, "event for evicted execution ignored");
                Ok(())
            }
            other => other,
        }
    }

    /// Set-style node update: statuses and counts are taken as given, so
    /// repeated application converges instead of accumulating.
    async fn set_node_state(
        &self,
        execution_id: &ExecutionId,
        node_id: &NodeId,
        status: Status,
        error: Option<String>,
        exec_count: Option<u32>,
    ) -> Result<()> {
        let node_id = node_id.clone();
        self.cache
            .mutate(
                execution_id,
                Box::new(move |state| {
                    let node = state.node_states.entry(node_id).or_default();
                    let now = chrono::Utc::now();
                    if status == Status::Running && node.started_at.is_none() {
                        node.started_at = Some(now);
                    }
                    if status.is_terminal() && node.ended_at.is_none() {
                        node.ended_at = Some(now);
                    }
                    node.status = status;
                    if error.is_some() {
                        node.error = error;
                    }
                    if let Some(count) = exec_count {
                        node.exec_count = node.exec_count.max(count);
                    }
                }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LiveExecutionCache;
    use crate::memory::InMemoryStateRepository;
    use dipeo_domain::payloads;

    fn service() -> StateService {
        let repo = Arc::new(InMemoryStateRepository::new());
        let cache = Arc::new(LiveExecutionCache::new(repo.clone()));
        StateService::new(cache, repo)
    }

    #[tokio::test]
    async fn test_lifecycle_flushes_on_terminal() {
        let svc = service();
        let id = ExecutionId::new("exec_1");
        let state = svc
            .start_execution(id.clone(), None, BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(state.status, Status::Running);
        assert!(state.started_at.is_some());

        let node = NodeId::new("n1");
        svc.update_node_status(&id, &node, Status::Running, None)
            .await
            .unwrap();
        svc.update_node_execution(
            &id,
            &node,
            Envelope::text("done", node.clone(), id.clone()),
            Status::Completed,
            Some(TokenUsage::new(5, 7, 0)),
            None,
        )
        .await
        .unwrap();

        let finished = svc
            .finish_execution(&id, Status::Completed, None)
            .await
            .unwrap();
        assert_eq!(finished.status, Status::Completed);
        assert_eq!(finished.token_usage.total, 12);

        // Evicted from cache, readable from the repo.
        let read_back = svc.get_execution_state(&id).await.unwrap().unwrap();
        assert_eq!(read_back.status, Status::Completed);
        assert_eq!(
            read_back.aggregate_node_tokens().total,
            read_back.token_usage.total
        );
    }

    #[tokio::test]
    async fn test_apply_event_updates_node_state() {
        let svc = service();
        let id = ExecutionId::new("exec_2");
        svc.start_execution(id.clone(), None, BTreeMap::new())
            .await
            .unwrap();

        let node = NodeId::new("n1");
        let event = ExecutionEvent::new(
            EventType::NodeCompleted,
            id.clone(),
            payloads::node_status(&node, Status::Completed, None, 1),
        );
        svc.apply_event(&event).await.unwrap();

        let state = svc.get_execution_state(&id).await.unwrap().unwrap();
        assert_eq!(state.node_states[&node].status, Status::Completed);
    }

    #[tokio::test]
    async fn test_apply_event_for_unknown_execution_is_noop() {
        let svc = service();
        let event = ExecutionEvent::new(
            EventType::NodeCompleted,
            ExecutionId::new("ghost"),
            payloads::node_status(&NodeId::new("n"), Status::Completed, None, 1),
        );
        assert!(svc.apply_event(&event).await.is_ok());
    }
}
