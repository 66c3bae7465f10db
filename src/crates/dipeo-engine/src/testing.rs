//! Test fixtures shared by handler unit tests and integration tests.

use crate::cancel::CancelToken;
use crate::registry::ServiceRegistry;
use crate::request::ExecutionRequest;
use dipeo_compiler::{ExecutableDiagram, ExecutableNode, ExecutionHints};
use dipeo_domain::{DiagramMetadata, ExecutionId, NodeData, NodeId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A one-node diagram around the node under test.
pub fn diagram_with_node(node: ExecutableNode) -> Arc<ExecutableDiagram> {
    Arc::new(ExecutableDiagram {
        execution_order: vec![node.id.clone()],
        nodes: vec![node],
        edges: Vec::new(),
        execution_hints: ExecutionHints::default(),
        metadata: DiagramMetadata::default(),
        persons: BTreeMap::new(),
        api_keys: BTreeMap::new(),
    })
}

/// Request for a single node with an empty service registry.
pub fn request_for(data: NodeData) -> ExecutionRequest {
    request_with_services(data, |_| {})
}

/// Request for a single node with services bound by the caller.
pub fn request_with_services(
    data: NodeData,
    bind: impl FnOnce(&mut ServiceRegistry),
) -> ExecutionRequest {
    let node = ExecutableNode {
        id: NodeId::new("node_under_test"),
        label: "node_under_test".to_string(),
        data,
    };
    let diagram = diagram_with_node(node.clone());
    let mut services = ServiceRegistry::new();
    bind(&mut services);
    ExecutionRequest {
        node,
        diagram,
        services: Arc::new(services),
        execution_id: ExecutionId::new("exec_test"),
        cancel: CancelToken::new(),
        variables: BTreeMap::new(),
        exec_counts: BTreeMap::new(),
        iteration: 0,
        is_sub_diagram: false,
    }
}
