//! The recursion seam between the engine and the `sub_diagram` handler.
//!
//! The handler resolves a [`DiagramRunner`] from the registry instead of
//! holding the engine directly, which keeps the dependency one-way: the
//! engine implements the trait and registers itself at startup.

use crate::cancel::CancelToken;
use crate::error::Result;
use async_trait::async_trait;
use dipeo_compiler::ExecutableDiagram;
use dipeo_domain::{ExecutionId, Status};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One nested execution ask.
pub struct SubDiagramRequest {
    pub parent_execution_id: ExecutionId,
    pub variables: BTreeMap<String, Value>,
    /// Give the child a fresh person/conversation scope.
    pub isolate_conversation: bool,
    /// Parent cancellation propagates into the child.
    pub cancel: CancelToken,
}

/// What a nested execution produced.
pub struct SubDiagramResult {
    pub execution_id: ExecutionId,
    pub status: Status,
    /// Terminal node outputs keyed by node label.
    pub outputs: BTreeMap<String, Value>,
    pub error: Option<String>,
}

#[async_trait]
pub trait DiagramRunner: Send + Sync {
    /// Run a child diagram to completion with its own execution ID, state
    /// record, and event stream.
    async fn run_sub_diagram(
        &self,
        diagram: Arc<ExecutableDiagram>,
        request: SubDiagramRequest,
    ) -> Result<SubDiagramResult>;
}
