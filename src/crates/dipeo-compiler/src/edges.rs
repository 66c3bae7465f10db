//! Arrow resolution: domain arrows become transform-annotated edges.

use crate::error::{CompileError, Result};
use crate::executable::{ExecutableEdge, TransformRules};
use dipeo_domain::{
    parse_handle_id, ArrowContentType, DomainDiagram, HandleLabel, NodeId, NodeType,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Resolve every arrow, deriving transform rules from the endpoint node
/// types, the content type, and the handle labels.
pub fn resolve_edges(diagram: &DomainDiagram) -> Result<Vec<ExecutableEdge>> {
    let mut edges = Vec::with_capacity(diagram.arrows.len());

    for arrow in &diagram.arrows {
        let source = parse_handle_id(&arrow.source)
            .map_err(|e| CompileError::handle(format!("arrow '{}': {e}", arrow.id)))?;
        let target = parse_handle_id(&arrow.target)
            .map_err(|e| CompileError::handle(format!("arrow '{}': {e}", arrow.id)))?;

        let source_type = diagram
            .get_node(&source.node_id)
            .map(|n| n.node_type)
            .ok_or_else(|| {
                CompileError::handle(format!(
                    "arrow '{}' source node '{}' does not exist",
                    arrow.id, source.node_id
                ))
            })?;
        diagram.get_node(&target.node_id).ok_or_else(|| {
            CompileError::handle(format!(
                "arrow '{}' target node '{}' does not exist",
                arrow.id, target.node_id
            ))
        })?;

        let is_conditional = matches!(
            source.label,
            HandleLabel::Condtrue | HandleLabel::Condfalse
        );
        let requires_first_execution = target.label == HandleLabel::First
            || arrow
                .data
                .get("requires_first_execution")
                .and_then(Value::as_bool)
                .unwrap_or(false);

        let transform_rules = TransformRules {
            pass_conversation: arrow.content_type == Some(ArrowContentType::ConversationState)
                && source_type == NodeType::PersonJob,
            variable_name: if arrow.content_type == Some(ArrowContentType::Variable) {
                Some(
                    arrow
                        .label
                        .clone()
                        .unwrap_or_else(|| source.node_id.to_string()),
                )
            } else {
                None
            },
            parse_json: matches!(
                arrow.content_type,
                Some(ArrowContentType::Object) | Some(ArrowContentType::Json)
            ),
        };

        let mut metadata = arrow.data.clone();
        if let Some(label) = &arrow.label {
            metadata.insert("label".to_string(), Value::String(label.clone()));
        }

        edges.push(ExecutableEdge {
            id: arrow.id.clone(),
            source_node: source.node_id,
            target_node: target.node_id,
            source_output_label: source.label,
            target_input_label: target.label,
            content_type: arrow.content_type,
            transform_rules,
            is_conditional,
            requires_first_execution,
            metadata,
        });
    }

    inherit_condition_content_types(diagram, &mut edges);
    Ok(edges)
}

/// A condition's branch outputs inherit the content type of its inputs
/// when all inputs agree and the branch edge declares none of its own.
fn inherit_condition_content_types(diagram: &DomainDiagram, edges: &mut [ExecutableEdge]) {
    let condition_ids: Vec<NodeId> = diagram
        .nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Condition)
        .map(|n| n.id.clone())
        .collect();

    let mut inherited: BTreeMap<NodeId, ArrowContentType> = BTreeMap::new();
    for id in &condition_ids {
        let incoming: Vec<Option<ArrowContentType>> = edges
            .iter()
            .filter(|e| &e.target_node == id)
            .map(|e| e.content_type)
            .collect();
        if incoming.is_empty() {
            continue;
        }
        if let Some(Some(first)) = incoming.first() {
            if incoming.iter().all(|ct| ct.as_ref() == Some(first)) {
                inherited.insert(id.clone(), *first);
            }
        }
    }

    for edge in edges.iter_mut() {
        if edge.content_type.is_none() && edge.is_conditional {
            if let Some(ct) = inherited.get(&edge.source_node) {
                edge.content_type = Some(*ct);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::generate_missing_handles;
    use dipeo_domain::{
        create_handle_id, ArrowId, DomainArrow, DomainNode, HandleDirection, Position,
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

    fn arrow_between(
        id: &str,
        source: (&str, HandleLabel),
        target: (&str, HandleLabel),
        content_type: Option<ArrowContentType>,
    ) -> DomainArrow {
        DomainArrow {
            id: ArrowId::new(id),
            source: create_handle_id(
                &NodeId::new(source.0),
                source.1,
                HandleDirection::Output,
            ),
            target: create_handle_id(&NodeId::new(target.0), target.1, HandleDirection::Input),
            content_type,
            label: None,
            data: Map::new(),
        }
    }

    #[test]
    fn test_conditional_and_first_flags() {
        let mut d = DomainDiagram {
            nodes: vec![
                node("s", NodeType::Start),
                node("c", NodeType::Condition),
                node("p", NodeType::PersonJob),
            ],
            arrows: vec![
                arrow_between(
                    "a1",
                    ("c", HandleLabel::Condtrue),
                    ("p", HandleLabel::First),
                    None,
                ),
                arrow_between(
                    "a2",
                    ("s", HandleLabel::Default),
                    ("c", HandleLabel::Default),
                    None,
                ),
            ],
            ..Default::default()
        };
        generate_missing_handles(&mut d);
        let edges = resolve_edges(&d).unwrap();
        let e1 = edges.iter().find(|e| e.id.as_str() == "a1").unwrap();
        assert!(e1.is_conditional);
        assert!(e1.requires_first_execution);
        let e2 = edges.iter().find(|e| e.id.as_str() == "a2").unwrap();
        assert!(!e2.is_conditional);
        assert!(!e2.requires_first_execution);
    }

    #[test]
    fn test_conversation_transform_rule() {
        let mut d = DomainDiagram {
            nodes: vec![node("p", NodeType::PersonJob), node("k", NodeType::CodeJob)],
            arrows: vec![arrow_between(
                "a1",
                ("p", HandleLabel::Default),
                ("k", HandleLabel::Default),
                Some(ArrowContentType::ConversationState),
            )],
            ..Default::default()
        };
        generate_missing_handles(&mut d);
        let edges = resolve_edges(&d).unwrap();
        assert!(edges[0].transform_rules.pass_conversation);
    }

    #[test]
    fn test_condition_content_type_inheritance() {
        let mut d = DomainDiagram {
            nodes: vec![
                node("s", NodeType::Start),
                node("c", NodeType::Condition),
                node("e", NodeType::Endpoint),
            ],
            arrows: vec![
                arrow_between(
                    "in",
                    ("s", HandleLabel::Default),
                    ("c", HandleLabel::Default),
                    Some(ArrowContentType::Object),
                ),
                arrow_between(
                    "out",
                    ("c", HandleLabel::Condtrue),
                    ("e", HandleLabel::Default),
                    None,
                ),
            ],
            ..Default::default()
        };
        generate_missing_handles(&mut d);
        let edges = resolve_edges(&d).unwrap();
        let out = edges.iter().find(|e| e.id.as_str() == "out").unwrap();
        assert_eq!(out.content_type, Some(ArrowContentType::Object));
    }

    #[test]
    fn test_variable_edge_named_by_label() {
        let mut d = DomainDiagram {
            nodes: vec![node("s", NodeType::Start), node("k", NodeType::CodeJob)],
            arrows: vec![{
                let mut a = arrow_between(
                    "a1",
                    ("s", HandleLabel::Default),
                    ("k", HandleLabel::Default),
                    Some(ArrowContentType::Variable),
                );
                a.label = Some("config".to_string());
                a
            }],
            ..Default::default()
        };
        generate_missing_handles(&mut d);
        let edges = resolve_edges(&d).unwrap();
        assert_eq!(
            edges[0].transform_rules.variable_name.as_deref(),
            Some("config")
        );
        assert_eq!(edges[0].metadata.get("label"), Some(&json!("config")));
    }
}
