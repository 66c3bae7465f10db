//! Storage ports.
//!
//! [`StateRepository`] is the durable CRUD surface; [`ExecutionCache`] is
//! the live-execution cache with the same read surface plus cache-only
//! creation and terminal flush. Backends are pluggable; the crate ships an
//! in-memory repository and an on-disk JSON repository.

use crate::error::Result;
use async_trait::async_trait;
use dipeo_domain::{
    DiagramId, Envelope, ExecutionId, ExecutionState, NodeId, Status, TokenUsage,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Filter for execution listings.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub diagram_id: Option<DiagramId>,
    pub status: Option<Status>,
    pub limit: usize,
    pub offset: usize,
}

impl ExecutionFilter {
    pub fn matches(&self, state: &ExecutionState) -> bool {
        if let Some(d) = &self.diagram_id {
            if state.diagram_id.as_ref() != Some(d) {
                return false;
            }
        }
        if let Some(s) = self.status {
            if state.status != s {
                return false;
            }
        }
        true
    }
}

/// Durable CRUD on execution records.
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn create_execution(
        &self,
        execution_id: ExecutionId,
        diagram_id: Option<DiagramId>,
        variables: BTreeMap<String, Value>,
    ) -> Result<ExecutionState>;

    async fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<ExecutionState>>;

    async fn save_execution(&self, state: &ExecutionState) -> Result<()>;

    async fn update_status(
        &self,
        execution_id: &ExecutionId,
        status: Status,
        error: Option<String>,
    ) -> Result<()>;

    async fn update_node_status(
        &self,
        execution_id: &ExecutionId,
        node_id: &NodeId,
        status: Status,
        error: Option<String>,
    ) -> Result<()>;

    async fn update_node_output(
        &self,
        execution_id: &ExecutionId,
        node_id: &NodeId,
        output: Envelope,
        token_usage: Option<TokenUsage>,
    ) -> Result<()>;

    async fn add_token_usage(
        &self,
        execution_id: &ExecutionId,
        tokens: TokenUsage,
    ) -> Result<()>;

    async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionState>>;

    /// Delete terminal executions older than `days`. Returns how many were
    /// removed.
    async fn cleanup_older_than(&self, days: i64) -> Result<usize>;
}

/// Live-execution cache: same read surface as the repository, plus
/// cache-only creation and the terminal flush that moves a record to the
/// durable repo and evicts it.
#[async_trait]
pub trait ExecutionCache: Send + Sync {
    async fn create_in_cache(
        &self,
        execution_id: ExecutionId,
        diagram_id: Option<DiagramId>,
        variables: BTreeMap<String, Value>,
    ) -> Result<ExecutionState>;

    async fn get_cached(&self, execution_id: &ExecutionId) -> Option<ExecutionState>;

    /// Serialized mutation of one cached execution. The closure runs under
    /// the per-execution write lock.
    async fn mutate(
        &self,
        execution_id: &ExecutionId,
        f: Box<dyn for<'a> FnOnce(&'a mut ExecutionState) + Send>,
    ) -> Result<()>;

    /// Flush a terminal record to the durable repository and evict it.
    async fn persist_final_state(&self, execution_id: &ExecutionId) -> Result<ExecutionState>;

    fn live_count(&self) -> usize;
}
