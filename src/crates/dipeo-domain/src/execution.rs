//! Execution state model.
//!
//! One [`ExecutionState`] record per execution, owned and mutated only by
//! the state store. The scheduler and handlers go through store methods;
//! everyone else reads snapshots.

use crate::enums::Status;
use crate::envelope::Envelope;
use crate::ids::{DiagramId, ExecutionId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Aggregated LLM token usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cached: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64, cached: u64) -> Self {
        Self {
            input,
            output,
            cached,
            total: input + output,
        }
    }

    /// Component-wise saturating add; `total` stays `input + output`.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
        self.cached = self.cached.saturating_add(other.cached);
        self.total = self.input.saturating_add(self.output);
    }

    pub fn is_zero(&self) -> bool {
        self.input == 0 && self.output == 0 && self.cached == 0
    }
}

/// Per-node execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// How many times this node has completed a run. Loop participants go
    /// past 1.
    #[serde(default)]
    pub exec_count: u32,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            status: Status::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            exec_count: 0,
            token_usage: TokenUsage::default(),
        }
    }
}

/// The per-execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub id: ExecutionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<DiagramId>,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub node_states: BTreeMap<NodeId, NodeState>,
    /// Latest envelope per node.
    #[serde(default)]
    pub node_outputs: BTreeMap<NodeId, Envelope>,
    /// Execution-scoped variables, seeded from caller inputs.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl ExecutionState {
    pub fn new(id: ExecutionId, diagram_id: Option<DiagramId>) -> Self {
        Self {
            id,
            diagram_id,
            status: Status::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            node_states: BTreeMap::new(),
            node_outputs: BTreeMap::new(),
            variables: BTreeMap::new(),
            token_usage: TokenUsage::default(),
        }
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn node_state(&self, node_id: &NodeId) -> Option<&NodeState> {
        self.node_states.get(node_id)
    }

    pub fn exec_count(&self, node_id: &NodeId) -> u32 {
        self.node_states
            .get(node_id)
            .map(|s| s.exec_count)
            .unwrap_or(0)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Sum of per-node token usage; the record's `token_usage` must equal
    /// this at every terminal transition.
    pub fn aggregate_node_tokens(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for state in self.node_states.values() {
            total.add(&state.token_usage);
        }
        total
    }
}
