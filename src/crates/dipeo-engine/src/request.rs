//! The execution request handed to every handler phase.

use crate::cancel::CancelToken;
use crate::registry::ServiceRegistry;
use dipeo_compiler::{ExecutableDiagram, ExecutableNode};
use dipeo_domain::{DomainPerson, Envelope, ExecutionId, NodeId, PersonId};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Inputs delivered to a node, keyed by input key (the edge's variable
/// name, its label, or `default`).
pub type Inputs = BTreeMap<String, Envelope>;

/// Everything a handler may touch during one node run.
#[derive(Clone)]
pub struct ExecutionRequest {
    pub node: ExecutableNode,
    pub diagram: Arc<ExecutableDiagram>,
    pub services: Arc<ServiceRegistry>,
    pub execution_id: ExecutionId,
    pub cancel: CancelToken,
    /// Execution-scoped variable snapshot.
    pub variables: BTreeMap<String, Value>,
    /// Completed-run counts for every node, for condition evaluation.
    pub exec_counts: BTreeMap<NodeId, u32>,
    /// This node's completed-run count before the current run.
    pub iteration: u32,
    /// The surrounding execution is itself a sub-diagram.
    pub is_sub_diagram: bool,
}

impl ExecutionRequest {
    pub fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    pub fn person(&self, person_id: &PersonId) -> Option<&DomainPerson> {
        self.diagram.persons.get(person_id)
    }

    /// Template scope: variables plus loop position.
    pub fn template_scope(&self, inputs: &Value) -> Value {
        let mut scope = serde_json::Map::new();
        for (k, v) in &self.variables {
            scope.insert(k.clone(), v.clone());
        }
        if let Value::Object(map) = inputs {
            for (k, v) in map {
                scope.insert(k.clone(), v.clone());
            }
        }
        scope.insert("iteration".to_string(), Value::from(self.iteration));
        Value::Object(scope)
    }
}
