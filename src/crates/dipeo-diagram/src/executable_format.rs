//! On-disk executable format.
//!
//! A compiled diagram serializes to JSON that preserves compilation:
//! loading reconstructs typed nodes from their `{type, data}` pairs
//! through the node-data catalog and skips re-validation.

use crate::error::{DiagramError, Result};
use dipeo_compiler::ExecutableDiagram;
use serde_json::Value;

const FORMAT_TAG: &str = "executable";

pub fn serialize_executable(diagram: &ExecutableDiagram) -> Result<String> {
    let mut value = serde_json::to_value(diagram)?;
    if let Value::Object(map) = &mut value {
        map.insert("format".to_string(), Value::String(FORMAT_TAG.to_string()));
    }
    Ok(serde_json::to_string_pretty(&value)?)
}

pub fn deserialize_to_executable(content: &str) -> Result<ExecutableDiagram> {
    let mut value: Value = serde_json::from_str(content)?;
    if let Value::Object(map) = &mut value {
        match map.remove("format") {
            Some(Value::String(tag)) if tag == FORMAT_TAG => {}
            Some(other) => {
                return Err(DiagramError::parse(
                    "executable",
                    format!("unexpected format tag {other}"),
                ))
            }
            None => {}
        }
    }
    Ok(serde_json::from_value(value)?)
}

pub fn is_executable_format(content: &str) -> bool {
    serde_json::from_str::<Value>(content)
        .ok()
        .and_then(|v| {
            v.get("format")
                .and_then(Value::as_str)
                .map(|tag| tag == FORMAT_TAG)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dipeo_compiler::compile;
    use dipeo_domain::{
        create_handle_id, ArrowId, DomainArrow, DomainDiagram, DomainNode, HandleDirection,
        HandleLabel, NodeId, NodeType, Position,
    };
    use serde_json::Map;

    fn compiled() -> ExecutableDiagram {
        let diagram = DomainDiagram {
            nodes: vec![
                DomainNode {
                    id: NodeId::new("s"),
                    node_type: NodeType::Start,
                    position: Position::default(),
                    data: Map::new(),
                },
                DomainNode {
                    id: NodeId::new("e"),
                    node_type: NodeType::Endpoint,
                    position: Position::default(),
                    data: Map::new(),
                },
            ],
            arrows: vec![DomainArrow {
                id: ArrowId::new("a1"),
                source: create_handle_id(
                    &NodeId::new("s"),
                    HandleLabel::Default,
                    HandleDirection::Output,
                ),
                target: create_handle_id(
                    &NodeId::new("e"),
                    HandleLabel::Default,
                    HandleDirection::Input,
                ),
                content_type: None,
                label: None,
                data: Map::new(),
            }],
            ..Default::default()
        };
        compile(&diagram).unwrap()
    }

    #[test]
    fn test_round_trip_preserves_compilation() {
        let original = compiled();
        let serialized = serialize_executable(&original).unwrap();
        assert!(is_executable_format(&serialized));

        let loaded = deserialize_to_executable(&serialized).unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.nodes[0].node_type(), NodeType::Start);
    }

    #[test]
    fn test_idempotent_bytes() {
        let original = compiled();
        let first = serialize_executable(&original).unwrap();
        let second = serialize_executable(&deserialize_to_executable(&first).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_wrong_tag_rejected() {
        let err = deserialize_to_executable(r#"{"format": "zip", "nodes": []}"#).unwrap_err();
        assert!(err.to_string().contains("format tag"));
    }
}
