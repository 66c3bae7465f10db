//! # dipeo-compiler - DomainDiagram to ExecutableDiagram
//!
//! Lowers a validated domain diagram into the schedulable form: typed
//! nodes, resolved transform-annotated edges, and topological execution
//! hints. Compilation is deterministic; the same diagram compiles to the
//! same executable bytes.
//!
//! Pipeline:
//!
//! 1. Generate the default handles the node types call for.
//! 2. Validate structural invariants (fails here never reach runtime).
//! 3. Parse node payloads into the typed catalog.
//! 4. Optionally inline `prompt_file` references.
//! 5. Resolve arrows into edges with transform rules.
//! 6. Topologically order, annotating iteration-bounded cycles.

pub mod error;
pub mod executable;

mod edges;
mod generate;
mod order;
mod prompts;
mod validate;

pub use error::{CompileError, Result};
pub use executable::{
    ExecutableDiagram, ExecutableEdge, ExecutableNode, ExecutionHints, TransformRules,
};
pub use order::is_condition_in_loop;

use dipeo_domain::{DomainDiagram, NodeData};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Options for one compilation.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Relax the single-start invariant: a sub-diagram may be started from
    /// caller inputs alone.
    pub as_sub_diagram: bool,
    /// Directory prompt files resolve against, usually the diagram's parent.
    pub base_path: Option<PathBuf>,
}

/// Compile with default options.
pub fn compile(diagram: &DomainDiagram) -> Result<ExecutableDiagram> {
    compile_with_options(diagram, &CompileOptions::default())
}

pub fn compile_with_options(
    diagram: &DomainDiagram,
    options: &CompileOptions,
) -> Result<ExecutableDiagram> {
    let mut diagram = diagram.clone();
    generate::generate_missing_handles(&mut diagram);
    validate::validate(&diagram, options)?;

    let mut nodes = Vec::with_capacity(diagram.nodes.len());
    for node in &diagram.nodes {
        // Parse cannot fail after validation, but the error path stays typed.
        let data = NodeData::parse(node.node_type, &node.data)?;
        nodes.push(ExecutableNode {
            id: node.id.clone(),
            label: node.label().to_string(),
            data,
        });
    }

    let base_path = options.base_path.clone().or_else(|| {
        diagram
            .metadata
            .source_path
            .as_ref()
            .and_then(|p| PathBuf::from(p).parent().map(PathBuf::from))
    });
    if let Some(base) = &base_path {
        prompts::resolve_prompts(&mut nodes, base)?;
    }

    let edges = edges::resolve_edges(&diagram)?;
    let (execution_order, execution_hints) = order::order_nodes(&nodes, &edges)?;

    let persons: BTreeMap<_, _> = diagram
        .persons
        .iter()
        .map(|p| (p.id.clone(), p.clone()))
        .collect();
    let api_keys: BTreeMap<String, String> = diagram
        .persons
        .iter()
        .filter_map(|p| {
            p.llm_config
                .api_key_id
                .as_ref()
                .map(|k| (k.to_string(), p.llm_config.service.clone()))
        })
        .collect();

    tracing::debug!(
        nodes = nodes.len(),
        edges = edges.len(),
        loops = execution_hints.loop_nodes.len(),
        "compiled diagram"
    );

    Ok(ExecutableDiagram {
        nodes,
        edges,
        execution_order,
        execution_hints,
        metadata: diagram.metadata.clone(),
        persons,
        api_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dipeo_domain::{
        create_handle_id, ArrowId, DomainArrow, DomainNode, HandleDirection, HandleLabel, NodeId,
        NodeType, Position,
    };
    use serde_json::Map;

    fn node(id: &str, node_type: NodeType) -> DomainNode {
        DomainNode {
            id: NodeId::new(id),
            node_type,
            position: Position::default(),
            data: Map::new(),
        }
    }

    fn arrow(id: &str, source: &str, target: &str) -> DomainArrow {
        DomainArrow {
            id: ArrowId::new(id),
            source: create_handle_id(
                &NodeId::new(source),
                HandleLabel::Default,
                HandleDirection::Output,
            ),
            target: create_handle_id(
                &NodeId::new(target),
                HandleLabel::Default,
                HandleDirection::Input,
            ),
            content_type: None,
            label: None,
            data: Map::new(),
        }
    }

    fn linear_diagram() -> DomainDiagram {
        DomainDiagram {
            nodes: vec![
                node("s", NodeType::Start),
                node("k", NodeType::CodeJob),
                node("e", NodeType::Endpoint),
            ],
            arrows: vec![arrow("a1", "s", "k"), arrow("a2", "k", "e")],
            ..Default::default()
        }
    }

    #[test]
    fn test_compile_linear() {
        let compiled = compile(&linear_diagram()).unwrap();
        assert_eq!(compiled.nodes.len(), 3);
        assert_eq!(compiled.edges.len(), 2);
        assert_eq!(
            compiled.execution_order,
            vec![NodeId::new("s"), NodeId::new("k"), NodeId::new("e")]
        );
        assert!(compiled.start_node().is_some());
    }

    #[test]
    fn test_compile_is_deterministic() {
        let d = linear_diagram();
        let a = serde_json::to_vec(&compile(&d).unwrap()).unwrap();
        let b = serde_json::to_vec(&compile(&d).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_arrow_endpoints_exist_in_nodes() {
        let compiled = compile(&linear_diagram()).unwrap();
        for edge in &compiled.edges {
            assert!(compiled.get_node(&edge.source_node).is_some());
            assert!(compiled.get_node(&edge.target_node).is_some());
        }
    }

    #[test]
    fn test_zero_node_diagram_rejected() {
        let err = compile(&DomainDiagram::default()).unwrap_err();
        assert!(matches!(err, CompileError::Validation(_)));
    }
}
