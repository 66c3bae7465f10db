//! Default handle generation.
//!
//! Diagrams declared without explicit handles (light and readable formats)
//! get the handles their node types call for, per `HANDLE_SPECS`. Existing
//! handles are never touched.

use dipeo_domain::{
    create_handle_id, handle_specs, DomainDiagram, DomainHandle, HandleDirection,
};

/// Add every spec-defined handle that is missing. Idempotent.
pub fn generate_missing_handles(diagram: &mut DomainDiagram) {
    let mut new_handles = Vec::new();

    for node in &diagram.nodes {
        for spec in handle_specs(node.node_type) {
            let id = create_handle_id(&node.id, spec.label, spec.direction);
            let exists = diagram.handles.iter().any(|h| h.id == id)
                || new_handles.iter().any(|h: &DomainHandle| h.id == id);
            if !exists {
                new_handles.push(DomainHandle {
                    id,
                    node_id: node.id.clone(),
                    label: spec.label,
                    direction: spec.direction,
                    data_type: spec.data_type,
                    position: Some(
                        match spec.direction {
                            HandleDirection::Input => "left",
                            HandleDirection::Output => "right",
                        }
                        .to_string(),
                    ),
                });
            }
        }
    }

    diagram.handles.extend(new_handles);
}

#[cfg(test)]
mod tests {
    use super::*;
    use dipeo_domain::{DomainNode, HandleLabel, NodeId, NodeType, Position};
    use serde_json::Map;

    fn diagram_with(node_type: NodeType) -> DomainDiagram {
        DomainDiagram {
            nodes: vec![DomainNode {
                id: NodeId::new("n1"),
                node_type,
                position: Position::default(),
                data: Map::new(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_generates_condition_handles() {
        let mut d = diagram_with(NodeType::Condition);
        generate_missing_handles(&mut d);
        assert_eq!(d.handles.len(), 3);
        assert!(d
            .handles
            .iter()
            .any(|h| h.label == HandleLabel::Condtrue && h.direction == HandleDirection::Output));
    }

    #[test]
    fn test_generates_person_job_first_input() {
        let mut d = diagram_with(NodeType::PersonJob);
        generate_missing_handles(&mut d);
        assert!(d
            .handles
            .iter()
            .any(|h| h.label == HandleLabel::First && h.direction == HandleDirection::Input));
    }

    #[test]
    fn test_idempotent() {
        let mut d = diagram_with(NodeType::Start);
        generate_missing_handles(&mut d);
        let count = d.handles.len();
        generate_missing_handles(&mut d);
        assert_eq!(d.handles.len(), count);
    }
}
