//! Structural validation of domain diagrams.
//!
//! Runs after default handle generation and before edge resolution. A
//! diagram that passes here can only fail at runtime for runtime reasons.

use crate::error::{CompileError, Result};
use crate::CompileOptions;
use dipeo_domain::{
    handle_specs, parse_handle_id, DomainDiagram, HandleDirection, HandleLabel, NodeData,
    NodeType,
};
use std::collections::BTreeSet;

pub fn validate(diagram: &DomainDiagram, options: &CompileOptions) -> Result<()> {
    if diagram.nodes.is_empty() {
        return Err(CompileError::validation("diagram has no nodes"));
    }

    let node_ids: BTreeSet<_> = diagram.nodes.iter().map(|n| n.id.clone()).collect();
    if node_ids.len() != diagram.nodes.len() {
        return Err(CompileError::validation("duplicate node IDs"));
    }

    let start_count = diagram.start_nodes().len();
    if !options.as_sub_diagram && start_count != 1 {
        return Err(CompileError::validation(format!(
            "diagram must have exactly one start node, found {start_count}"
        )));
    }
    if options.as_sub_diagram && start_count > 1 {
        return Err(CompileError::validation(format!(
            "sub-diagram may have at most one start node, found {start_count}"
        )));
    }

    // Handle table consistency: every handle belongs to an existing node,
    // its ID decodes back to its own fields, and its (label, direction) is
    // declared by the node type's spec.
    for handle in &diagram.handles {
        let node = diagram.get_node(&handle.node_id).ok_or_else(|| {
            CompileError::validation(format!(
                "handle '{}' references unknown node '{}'",
                handle.id, handle.node_id
            ))
        })?;

        let parsed = parse_handle_id(&handle.id)
            .map_err(|e| CompileError::handle(format!("handle '{}': {e}", handle.id)))?;
        if parsed.node_id != handle.node_id
            || parsed.label != handle.label
            || parsed.direction != handle.direction
        {
            return Err(CompileError::handle(format!(
                "handle '{}' does not encode its own node/label/direction",
                handle.id
            )));
        }

        let specs = handle_specs(node.node_type);
        if !specs
            .iter()
            .any(|s| s.label == handle.label && s.direction == handle.direction)
        {
            return Err(CompileError::validation(format!(
                "node '{}' of type '{}' does not declare {} handle '{}'",
                node.label(),
                node.node_type,
                handle.direction,
                handle.label
            )));
        }
    }

    // Required handles per spec.
    for node in &diagram.nodes {
        for spec in handle_specs(node.node_type) {
            if spec.required
                && !diagram
                    .handles_of(&node.id)
                    .any(|h| h.label == spec.label && h.direction == spec.direction)
            {
                return Err(CompileError::validation(format!(
                    "node '{}' is missing required {} handle '{}'",
                    node.label(),
                    spec.direction,
                    spec.label
                )));
            }
        }
    }

    // Condition nodes: exactly condtrue + condfalse outputs.
    for node in &diagram.nodes {
        if node.node_type == NodeType::Condition {
            let outputs: BTreeSet<HandleLabel> = diagram
                .handles_of(&node.id)
                .filter(|h| h.direction == HandleDirection::Output)
                .map(|h| h.label)
                .collect();
            let expected: BTreeSet<HandleLabel> =
                [HandleLabel::Condtrue, HandleLabel::Condfalse].into();
            if outputs != expected {
                return Err(CompileError::validation(format!(
                    "condition node '{}' must expose exactly condtrue and condfalse outputs",
                    node.label()
                )));
            }
        }
    }

    // Arrows: endpoints resolve, directions match roles.
    for arrow in &diagram.arrows {
        let source = diagram.get_handle(&arrow.source).ok_or_else(|| {
            CompileError::validation(format!(
                "arrow '{}' source handle '{}' does not exist",
                arrow.id, arrow.source
            ))
        })?;
        let target = diagram.get_handle(&arrow.target).ok_or_else(|| {
            CompileError::validation(format!(
                "arrow '{}' target handle '{}' does not exist",
                arrow.id, arrow.target
            ))
        })?;
        if source.direction != HandleDirection::Output {
            return Err(CompileError::validation(format!(
                "arrow '{}' uses input handle '{}' as source",
                arrow.id, arrow.source
            )));
        }
        if target.direction != HandleDirection::Input {
            return Err(CompileError::validation(format!(
                "arrow '{}' uses output handle '{}' as target",
                arrow.id, arrow.target
            )));
        }
    }

    // Typed payloads parse, and person references resolve.
    for node in &diagram.nodes {
        let data = NodeData::parse(node.node_type, &node.data).map_err(|e| {
            CompileError::validation(format!(
                "node '{}' has invalid {} payload: {e}",
                node.label(),
                node.node_type
            ))
        })?;
        let person_ref = match &data {
            NodeData::PersonJob(d) => d.person.clone(),
            NodeData::Condition(d) => d.person.clone(),
            _ => None,
        };
        if let Some(person_id) = person_ref {
            if diagram.get_person(&person_id).is_none() {
                return Err(CompileError::validation(format!(
                    "node '{}' references unknown person '{}'",
                    node.label(),
                    person_id
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::generate_missing_handles;
    use dipeo_domain::{
        create_handle_id, ArrowId, DomainArrow, DomainNode, HandleId, NodeId, Position,
    };
    use serde_json::{json, Map};

    fn node(id: &str, node_type: NodeType) -> DomainNode {
        DomainNode {
            id: NodeId::new(id),
            node_type,
            position: Position::default(),
            data: Map::new(),
        }
    }

    fn arrow(id: &str, source: HandleId, target: HandleId) -> DomainArrow {
        DomainArrow {
            id: ArrowId::new(id),
            source,
            target,
            content_type: None,
            label: None,
            data: Map::new(),
        }
    }

    #[test]
    fn test_empty_diagram_rejected() {
        let d = DomainDiagram::default();
        assert!(validate(&d, &CompileOptions::default()).is_err());
    }

    #[test]
    fn test_requires_exactly_one_start() {
        let mut d = DomainDiagram {
            nodes: vec![node("a", NodeType::Start), node("b", NodeType::Start)],
            ..Default::default()
        };
        generate_missing_handles(&mut d);
        let err = validate(&d, &CompileOptions::default()).unwrap_err();
        assert!(err.to_string().contains("exactly one start"));
    }

    #[test]
    fn test_sub_diagram_may_omit_start() {
        let mut d = DomainDiagram {
            nodes: vec![node("a", NodeType::CodeJob)],
            ..Default::default()
        };
        generate_missing_handles(&mut d);
        let opts = CompileOptions {
            as_sub_diagram: true,
            ..Default::default()
        };
        assert!(validate(&d, &opts).is_ok());
    }

    #[test]
    fn test_arrow_to_missing_handle_rejected() {
        let mut d = DomainDiagram {
            nodes: vec![node("a", NodeType::Start)],
            arrows: vec![arrow(
                "x",
                HandleId::new("a_default_output"),
                HandleId::new("ghost_default_input"),
            )],
            ..Default::default()
        };
        generate_missing_handles(&mut d);
        let err = validate(&d, &CompileOptions::default()).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_direction_mismatch_rejected() {
        let mut d = DomainDiagram {
            nodes: vec![node("a", NodeType::Start), node("b", NodeType::Endpoint)],
            ..Default::default()
        };
        generate_missing_handles(&mut d);
        // backwards: endpoint input used as source
        d.arrows.push(arrow(
            "x",
            create_handle_id(
                &NodeId::new("b"),
                HandleLabel::Default,
                HandleDirection::Input,
            ),
            create_handle_id(
                &NodeId::new("b"),
                HandleLabel::Default,
                HandleDirection::Input,
            ),
        ));
        let err = validate(&d, &CompileOptions::default()).unwrap_err();
        assert!(err.to_string().contains("as source"));
    }

    #[test]
    fn test_unknown_person_rejected() {
        let mut d = DomainDiagram {
            nodes: vec![node("a", NodeType::Start), {
                let mut n = node("b", NodeType::PersonJob);
                n.data = match json!({"person": "nobody"}) {
                    serde_json::Value::Object(m) => m,
                    _ => unreachable!(),
                };
                n
            }],
            ..Default::default()
        };
        generate_missing_handles(&mut d);
        let err = validate(&d, &CompileOptions::default()).unwrap_err();
        assert!(err.to_string().contains("unknown person"));
    }
}
