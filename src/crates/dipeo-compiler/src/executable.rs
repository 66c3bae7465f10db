//! The compiled, runtime-ready diagram form.
//!
//! An [`ExecutableDiagram`] is what the scheduler consumes: typed nodes,
//! resolved transform-annotated edges, and a topological ordering used as a
//! tie-breaker. It is not re-parseable from a diagram file; it has its own
//! on-disk JSON format (see `dipeo-diagram`).

use dipeo_domain::{
    ArrowContentType, ArrowId, DiagramMetadata, DomainPerson, HandleLabel, NodeData, NodeId,
    NodeType, PersonId,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A typed executable node: validated, parsed payload plus display label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableNode {
    pub id: NodeId,
    pub label: String,
    #[serde(flatten)]
    pub data: NodeData,
}

impl ExecutableNode {
    pub fn node_type(&self) -> NodeType {
        self.data.node_type()
    }
}

/// Value-shaping rules derived at compile time from the edge's endpoint
/// types and content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TransformRules {
    /// The edge carries a conversation array rather than rendered text
    /// (`person_job -> *` with `content_type = conversation_state`).
    #[serde(default)]
    pub pass_conversation: bool,
    /// Expose the value under this variable name in the target's inputs
    /// (`content_type = variable`, named by the arrow label).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<String>,
    /// Parse text payloads as JSON before handing them to the target
    /// (`content_type = object | json`).
    #[serde(default)]
    pub parse_json: bool,
}

impl TransformRules {
    pub fn is_identity(&self) -> bool {
        !self.pass_conversation && self.variable_name.is_none() && !self.parse_json
    }
}

/// A resolved, annotated edge between two executable nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableEdge {
    pub id: ArrowId,
    pub source_node: NodeId,
    pub target_node: NodeId,
    pub source_output_label: HandleLabel,
    pub target_input_label: HandleLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ArrowContentType>,
    #[serde(default)]
    pub transform_rules: TransformRules,
    /// Source handle is `condtrue`/`condfalse`: the edge only contributes
    /// when the condition last selected that branch.
    #[serde(default)]
    pub is_conditional: bool,
    /// Target handle is `first`: the edge only contributes on the target's
    /// first run.
    #[serde(default)]
    pub requires_first_execution: bool,
    /// Open metadata from the arrow (`continue_on_error`, labels, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ExecutableEdge {
    pub fn continue_on_error(&self) -> bool {
        self.metadata
            .get("continue_on_error")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Hints computed by cycle analysis: nodes that sit on an
/// iteration-bounded loop and may legitimately re-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionHints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loop_nodes: Vec<NodeId>,
}

/// The compiled diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableDiagram {
    pub nodes: Vec<ExecutableNode>,
    pub edges: Vec<ExecutableEdge>,
    /// Topological ordering used as a scheduling tie-breaker; the scheduler
    /// itself is data-driven. Loop participants appear once.
    pub execution_order: Vec<NodeId>,
    #[serde(default)]
    pub execution_hints: ExecutionHints,
    #[serde(default)]
    pub metadata: DiagramMetadata,
    /// Snapshot of person definitions, keyed by ID.
    #[serde(default)]
    pub persons: BTreeMap<PersonId, DomainPerson>,
    /// API key snapshot (id -> service name).
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
}

impl ExecutableDiagram {
    pub fn get_node(&self, id: &NodeId) -> Option<&ExecutableNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn start_node(&self) -> Option<&ExecutableNode> {
        self.nodes
            .iter()
            .find(|n| n.node_type() == NodeType::Start)
    }

    pub fn incoming_edges(&self, node: &NodeId) -> Vec<&ExecutableEdge> {
        self.edges
            .iter()
            .filter(|e| &e.target_node == node)
            .collect()
    }

    pub fn outgoing_edges(&self, node: &NodeId) -> Vec<&ExecutableEdge> {
        self.edges
            .iter()
            .filter(|e| &e.source_node == node)
            .collect()
    }

    pub fn is_loop_node(&self, node: &NodeId) -> bool {
        self.execution_hints.loop_nodes.contains(node)
    }

    /// Nodes with no outgoing edges; used for result collection.
    pub fn terminal_nodes(&self) -> Vec<&ExecutableNode> {
        self.nodes
            .iter()
            .filter(|n| self.outgoing_edges(&n.id).is_empty())
            .collect()
    }
}
