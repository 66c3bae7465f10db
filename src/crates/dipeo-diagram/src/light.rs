//! Light YAML strategy.
//!
//! The terse authoring format: nodes are a list of `{label, type,
//! position, props}`, connections a list of `{from, to, ...}` where
//! either end may carry a handle as `Label[handle]` (explicit, validated
//! against the node type's handle specs) or `Label_handle` (legacy
//! suffix). Arrows and handles are synthesized with deterministic IDs in
//! declaration order.

use crate::error::{DiagramError, Result};
use crate::strategy::{nest_dotted_keys, DiagramFormat, FormatStrategy};
use dipeo_domain::{
    create_handle_id, parse_handle_id, validate_bracket_syntax, ApiKeyId, ArrowContentType,
    ArrowId, DiagramMetadata, DomainArrow, DomainDiagram, DomainHandle, DomainNode, DomainPerson,
    HandleDirection, HandleLabel, NodeId, NodeType, PersonId, PersonLlmConfig, Position,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
struct LightDocument {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    persons: BTreeMap<String, LightPerson>,
    #[serde(default)]
    nodes: Vec<LightNode>,
    #[serde(default)]
    connections: Vec<LightConnection>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LightPerson {
    service: String,
    model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LightNode {
    label: String,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    position: Position,
    #[serde(default)]
    props: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct LightConnection {
    from: String,
    to: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    data: Map<String, Value>,
}

pub struct LightStrategy;

/// A `Label[handle]` or `Label_handle` endpoint reference resolved to a
/// node and handle label.
fn resolve_endpoint(
    raw: &str,
    label_to_id: &BTreeMap<String, NodeId>,
    node_types: &BTreeMap<NodeId, NodeType>,
    direction: HandleDirection,
) -> Result<(NodeId, HandleLabel)> {
    let raw = raw.trim();
    let bracket = Regex::new(r"^(.+?)\s*\[([^\]]+)\]$").expect("static regex");

    if let Some(captures) = bracket.captures(raw) {
        let node_label = captures[1].trim().to_string();
        let handle_name = captures[2].trim().to_string();
        let node_id = label_to_id.get(&node_label).ok_or_else(|| {
            DiagramError::connection(format!("unknown node label '{node_label}'"))
        })?;
        let node_type = node_types[node_id];
        // Bracket syntax is explicit: unknown handles fail loudly.
        let handle = validate_bracket_syntax(&node_label, &handle_name, node_type, direction)?;
        return Ok((node_id.clone(), handle));
    }

    if let Some(node_id) = label_to_id.get(raw) {
        return Ok((node_id.clone(), HandleLabel::Default));
    }

    // Legacy suffix form: split from the right until a known label appears.
    let parts: Vec<&str> = raw.split('_').collect();
    for split_at in (1..parts.len()).rev() {
        let prefix = parts[..split_at].join("_");
        if let Some(node_id) = label_to_id.get(&prefix) {
            let suffix = parts[split_at..].join("_");
            let handle = HandleLabel::from_str(&suffix).map_err(|_| {
                DiagramError::connection(format!(
                    "unknown handle suffix '{suffix}' on '{raw}'"
                ))
            })?;
            return Ok((node_id.clone(), handle));
        }
    }

    Err(DiagramError::connection(format!(
        "unknown node label '{raw}'"
    )))
}

pub(crate) fn ensure_handle(
    diagram: &mut DomainDiagram,
    node_id: &NodeId,
    label: HandleLabel,
    direction: HandleDirection,
) {
    let id = create_handle_id(node_id, label, direction);
    if diagram.handles.iter().any(|h| h.id == id) {
        return;
    }
    diagram.handles.push(DomainHandle {
        id,
        node_id: node_id.clone(),
        label,
        direction,
        data_type: Default::default(),
        position: Some(
            match direction {
                HandleDirection::Input => "left",
                HandleDirection::Output => "right",
            }
            .to_string(),
        ),
    });
}

impl FormatStrategy for LightStrategy {
    fn format(&self) -> DiagramFormat {
        DiagramFormat::Light
    }

    fn quick_match(&self, content: &str) -> bool {
        content.contains("version: light")
            || (content.contains("connections:") && !content.contains("flow:"))
    }

    fn detect_confidence(&self, content: &str) -> f32 {
        match serde_yaml::from_str::<LightDocument>(content) {
            Ok(doc) => {
                if doc.version.as_deref() == Some("light") {
                    1.0
                } else if !doc.nodes.is_empty() {
                    0.7
                } else {
                    0.2
                }
            }
            Err(_) => 0.0,
        }
    }

    fn deserialize_to_domain(&self, content: &str, path: Option<&str>) -> Result<DomainDiagram> {
        let doc: LightDocument = serde_yaml::from_str(content)?;

        let mut diagram = DomainDiagram {
            metadata: DiagramMetadata {
                name: doc.name,
                description: doc.description,
                version: Some("light".to_string()),
                source_path: path.map(String::from),
                ..Default::default()
            },
            ..Default::default()
        };

        for (label, person) in &doc.persons {
            diagram.persons.push(DomainPerson {
                id: PersonId::new(label.clone()),
                label: label.clone(),
                llm_config: PersonLlmConfig {
                    service: person.service.clone(),
                    model: person.model.clone(),
                    api_key_id: person.api_key_id.clone().map(ApiKeyId::new),
                    system_prompt: person.system_prompt.clone(),
                },
            });
        }

        let mut label_to_id = BTreeMap::new();
        let mut node_types = BTreeMap::new();
        for (index, node) in doc.nodes.iter().enumerate() {
            let node_type: NodeType = node.node_type.parse()?;
            if label_to_id
                .insert(node.label.clone(), NodeId::new(format!("node_{index}")))
                .is_some()
            {
                return Err(DiagramError::parse(
                    "light",
                    format!("duplicate node label '{}'", node.label),
                ));
            }
            let node_id = NodeId::new(format!("node_{index}"));
            node_types.insert(node_id.clone(), node_type);

            let mut data = nest_dotted_keys(node.props.clone());
            data.insert("label".to_string(), Value::String(node.label.clone()));
            diagram.nodes.push(DomainNode {
                id: node_id,
                node_type,
                position: node.position,
                data,
            });
        }

        for (index, connection) in doc.connections.iter().enumerate() {
            let (source_node, mut source_handle) = resolve_endpoint(
                &connection.from,
                &label_to_id,
                &node_types,
                HandleDirection::Output,
            )?;
            let (target_node, target_handle) = resolve_endpoint(
                &connection.to,
                &label_to_id,
                &node_types,
                HandleDirection::Input,
            )?;

            // Branch annotations route the source out of a condition.
            if source_handle == HandleLabel::Default {
                match connection.branch.as_deref() {
                    Some("true") => source_handle = HandleLabel::Condtrue,
                    Some("false") => source_handle = HandleLabel::Condfalse,
                    _ => {}
                }
            }

            let content_type = connection
                .content_type
                .as_deref()
                .map(ArrowContentType::from_str)
                .transpose()?;

            ensure_handle(&mut diagram, &source_node, source_handle, HandleDirection::Output);
            ensure_handle(&mut diagram, &target_node, target_handle, HandleDirection::Input);

            let mut data = connection.data.clone();
            if let Some(branch) = &connection.branch {
                data.insert("branch".to_string(), Value::String(branch.clone()));
            }

            diagram.arrows.push(DomainArrow {
                id: ArrowId::new(format!("arrow_{index}")),
                source: create_handle_id(&source_node, source_handle, HandleDirection::Output),
                target: create_handle_id(&target_node, target_handle, HandleDirection::Input),
                content_type,
                label: connection.label.clone(),
                data,
            });
        }

        Ok(diagram)
    }

    fn serialize_from_domain(&self, diagram: &DomainDiagram) -> Result<String> {
        let id_to_label: BTreeMap<NodeId, String> = diagram
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.label().to_string()))
            .collect();

        let mut doc = serde_yaml::Mapping::new();
        doc.insert("version".into(), "light".into());
        if let Some(name) = &diagram.metadata.name {
            doc.insert("name".into(), name.clone().into());
        }

        if !diagram.persons.is_empty() {
            let mut persons = serde_yaml::Mapping::new();
            for person in &diagram.persons {
                persons.insert(
                    person.label.clone().into(),
                    serde_yaml::to_value(LightPerson {
                        service: person.llm_config.service.clone(),
                        model: person.llm_config.model.clone(),
                        api_key_id: person.llm_config.api_key_id.as_ref().map(|k| k.to_string()),
                        system_prompt: person.llm_config.system_prompt.clone(),
                    })?,
                );
            }
            doc.insert("persons".into(), serde_yaml::Value::Mapping(persons));
        }

        let mut nodes = Vec::new();
        for node in &diagram.nodes {
            let mut entry = serde_yaml::Mapping::new();
            entry.insert("label".into(), node.label().into());
            entry.insert("type".into(), node.node_type.as_str().into());
            entry.insert("position".into(), serde_yaml::to_value(node.position)?);
            let mut props = node.data.clone();
            props.remove("label");
            if !props.is_empty() {
                entry.insert(
                    "props".into(),
                    serde_yaml::to_value(Value::Object(props))?,
                );
            }
            nodes.push(serde_yaml::Value::Mapping(entry));
        }
        doc.insert("nodes".into(), serde_yaml::Value::Sequence(nodes));

        let mut connections = Vec::new();
        for arrow in &diagram.arrows {
            let source = parse_handle_id(&arrow.source)?;
            let target = parse_handle_id(&arrow.target)?;
            let from_label = id_to_label.get(&source.node_id).cloned().ok_or_else(|| {
                DiagramError::connection(format!("arrow '{}' source node missing", arrow.id))
            })?;
            let to_label = id_to_label.get(&target.node_id).cloned().ok_or_else(|| {
                DiagramError::connection(format!("arrow '{}' target node missing", arrow.id))
            })?;

            let mut entry = serde_yaml::Mapping::new();
            let from = if source.label == HandleLabel::Default {
                from_label
            } else {
                format!("{from_label}[{}]", source.label)
            };
            let to = if target.label == HandleLabel::Default {
                to_label
            } else {
                format!("{to_label}[{}]", target.label)
            };
            entry.insert("from".into(), from.into());
            entry.insert("to".into(), to.into());
            if let Some(content_type) = arrow.content_type {
                entry.insert("content_type".into(), content_type.as_str().into());
            }
            if let Some(label) = &arrow.label {
                entry.insert("label".into(), label.clone().into());
            }
            connections.push(serde_yaml::Value::Mapping(entry));
        }
        doc.insert("connections".into(), serde_yaml::Value::Sequence(connections));

        Ok(serde_yaml::to_string(&serde_yaml::Value::Mapping(doc))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIGHT: &str = r#"
version: light
name: review-loop
persons:
  Writer:
    service: openai
    model: gpt-4o
    system_prompt: Be concise.
nodes:
  - label: Start
    type: start
    position: {x: 0, y: 0}
  - label: Draft
    type: person_job
    position: {x: 100, y: 0}
    props:
      person: Writer
      first_only_prompt: "Write about {{ topic }}"
      default_prompt: "Revise the draft"
      max_iteration: 3
  - label: Check
    type: condition
    position: {x: 200, y: 0}
    props:
      condition_type: detect_max_iterations
  - label: Done
    type: endpoint
    position: {x: 300, y: 0}
connections:
  - from: Start
    to: Draft_first
  - from: Draft
    to: Check
  - from: Check[condfalse]
    to: Draft
  - from: Check[condtrue]
    to: Done
    content_type: raw_text
"#;

    #[test]
    fn test_parse_light_diagram() {
        let diagram = LightStrategy.deserialize_to_domain(LIGHT, None).unwrap();
        assert_eq!(diagram.nodes.len(), 4);
        assert_eq!(diagram.persons.len(), 1);
        assert_eq!(diagram.arrows.len(), 4);

        // suffix form resolved the first input
        let seed = &diagram.arrows[0];
        assert!(seed.target.as_str().ends_with("_first_input"));
        // bracket form resolved the branch outputs
        let back = &diagram.arrows[2];
        assert!(back.source.as_str().ends_with("_condfalse_output"));
        assert_eq!(
            diagram.arrows[3].content_type,
            Some(ArrowContentType::RawText)
        );
    }

    #[test]
    fn test_person_props_survive() {
        let diagram = LightStrategy.deserialize_to_domain(LIGHT, None).unwrap();
        let draft = diagram.nodes.iter().find(|n| n.label() == "Draft").unwrap();
        assert_eq!(draft.data["person"], Value::String("Writer".into()));
        assert_eq!(draft.data["max_iteration"], Value::from(3));
    }

    #[test]
    fn test_bracket_with_unknown_handle_fails_loudly() {
        let bad = LIGHT.replace("Check[condfalse]", "Check[sideways]");
        let err = LightStrategy.deserialize_to_domain(&bad, None).unwrap_err();
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn test_unknown_label_fails() {
        let bad = LIGHT.replace("to: Done", "to: Ghost");
        let err = LightStrategy.deserialize_to_domain(&bad, None).unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let bad = LIGHT.replace("label: Done", "label: Start");
        assert!(LightStrategy.deserialize_to_domain(&bad, None).is_err());
    }

    #[test]
    fn test_round_trip_semantically_equal() {
        let diagram = LightStrategy.deserialize_to_domain(LIGHT, None).unwrap();
        let serialized = LightStrategy.serialize_from_domain(&diagram).unwrap();
        let back = LightStrategy.deserialize_to_domain(&serialized, None).unwrap();

        assert_eq!(back.nodes.len(), diagram.nodes.len());
        assert_eq!(back.arrows.len(), diagram.arrows.len());
        assert_eq!(back.persons, diagram.persons);
        for (a, b) in diagram.arrows.iter().zip(back.arrows.iter()) {
            assert_eq!(a.source, b.source);
            assert_eq!(a.target, b.target);
            assert_eq!(a.content_type, b.content_type);
        }
    }

    #[test]
    fn test_detection() {
        assert!(LightStrategy.quick_match(LIGHT));
        assert_eq!(LightStrategy.detect_confidence(LIGHT), 1.0);
        // YAML is a JSON superset, so bare JSON parses but scores low.
        assert!(LightStrategy.detect_confidence("{\"nodes\": []}") < 0.5);
    }
}
