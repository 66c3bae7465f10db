//! The serialization-neutral diagram model.
//!
//! A [`DomainDiagram`] is what every importer produces and what the compiler
//! consumes. Node payloads stay as open JSON maps here; they are parsed into
//! typed structs by the compiler through the node-data catalog.

use crate::enums::{ArrowContentType, DataType, HandleDirection, HandleLabel, NodeType};
use crate::ids::{ApiKeyId, ArrowId, DiagramId, HandleId, NodeId, PersonId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 2-D canvas position. Purely presentational; execution ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A node in a domain diagram. `data` is the type-specific payload and
/// always carries the user-facing `label` key when one was declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl DomainNode {
    /// User-facing label, falling back to the node ID.
    pub fn label(&self) -> &str {
        self.data
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or_else(|| self.id.as_str())
    }
}

/// A directed edge between two handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainArrow {
    pub id: ArrowId,
    pub source: HandleId,
    pub target: HandleId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ArrowContentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Open metadata: `{"branch": "true"}`, `{"continue_on_error": true}`, ...
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

/// An addressable port on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainHandle {
    pub id: HandleId,
    pub node_id: NodeId,
    pub label: HandleLabel,
    pub direction: HandleDirection,
    #[serde(default)]
    pub data_type: DataType,
    /// Canvas-side hint (`left` / `right`), presentational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

/// LLM configuration of a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonLlmConfig {
    pub service: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<ApiKeyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// An LLM agent identity referenced by `person_job` nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainPerson {
    pub id: PersonId,
    pub label: String,
    pub llm_config: PersonLlmConfig,
}

/// Diagram metadata block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DiagramMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<DiagramId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Source file path, set by importers; prompt pre-compilation resolves
    /// `prompt_file` references relative to it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

/// The complete domain diagram: ordered nodes, arrows, handles, persons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DomainDiagram {
    #[serde(default)]
    pub nodes: Vec<DomainNode>,
    #[serde(default)]
    pub arrows: Vec<DomainArrow>,
    #[serde(default)]
    pub handles: Vec<DomainHandle>,
    #[serde(default)]
    pub persons: Vec<DomainPerson>,
    #[serde(default)]
    pub metadata: DiagramMetadata,
}

impl DomainDiagram {
    pub fn get_node(&self, id: &NodeId) -> Option<&DomainNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn get_handle(&self, id: &HandleId) -> Option<&DomainHandle> {
        self.handles.iter().find(|h| &h.id == id)
    }

    pub fn get_person(&self, id: &PersonId) -> Option<&DomainPerson> {
        self.persons.iter().find(|p| &p.id == id)
    }

    /// Map from user-facing node label to node ID. Later nodes win on
    /// duplicate labels; importers reject duplicates before this matters.
    pub fn label_to_id(&self) -> BTreeMap<String, NodeId> {
        self.nodes
            .iter()
            .map(|n| (n.label().to_string(), n.id.clone()))
            .collect()
    }

    /// All handles belonging to one node.
    pub fn handles_of<'a>(&'a self, node_id: &'a NodeId) -> impl Iterator<Item = &'a DomainHandle> {
        self.handles.iter().filter(move |h| &h.node_id == node_id)
    }

    pub fn start_nodes(&self) -> Vec<&DomainNode> {
        self.nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Start)
            .collect()
    }
}
