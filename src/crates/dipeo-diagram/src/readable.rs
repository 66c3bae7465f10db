//! Readable YAML strategy.
//!
//! The documentation-friendly format: node headers carry the position
//! inline (`"Label @(x,y)"`) and the flow section reads like English
//! (`to "Dest" in "first" as "raw_text" naming "draft"`). Both the
//! quoted-English string and an explicit `{to, in, as, naming}` map are
//! accepted for flow targets.

use crate::error::{DiagramError, Result};
use crate::light::ensure_handle;
use crate::strategy::{nest_dotted_keys, DiagramFormat, FormatStrategy};
use dipeo_domain::{
    create_handle_id, parse_handle_id, validate_bracket_syntax, ApiKeyId, ArrowContentType,
    ArrowId, DiagramMetadata, DomainArrow, DomainDiagram, DomainNode, DomainPerson,
    HandleDirection, HandleLabel, NodeId, NodeType, PersonId, PersonLlmConfig, Position,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
struct ReadableDocument {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    persons: BTreeMap<String, ReadablePerson>,
    #[serde(default)]
    nodes: Vec<BTreeMap<String, Map<String, Value>>>,
    #[serde(default)]
    flow: Vec<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ReadablePerson {
    service: String,
    model: String,
    #[serde(default)]
    api_key_id: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
}

/// A flow target after annotation parsing.
#[derive(Debug, Default)]
struct FlowTarget {
    to: String,
    input: Option<String>,
    content_type: Option<String>,
    naming: Option<String>,
}

pub struct ReadableStrategy;

fn node_header() -> Regex {
    Regex::new(r"^(.*?)\s*@\(\s*(-?[\d.]+)\s*,\s*(-?[\d.]+)\s*\)$").expect("static regex")
}

fn source_ref() -> Regex {
    Regex::new(r"^(.+?)\s*\[\s*([^\]]+?)\s*\]$").expect("static regex")
}

fn english_target() -> Regex {
    Regex::new(
        r#"^to\s+"([^"]+)"(?:\s+in\s+"([^"]+)")?(?:\s+as\s+"([^"]+)")?(?:\s+naming\s+"([^"]+)")?$"#,
    )
    .expect("static regex")
}

fn parse_target(value: &Value) -> Result<FlowTarget> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Some(captures) = english_target().captures(s) {
                return Ok(FlowTarget {
                    to: captures[1].to_string(),
                    input: captures.get(2).map(|m| m.as_str().to_string()),
                    content_type: captures.get(3).map(|m| m.as_str().to_string()),
                    naming: captures.get(4).map(|m| m.as_str().to_string()),
                });
            }
            if let Some(captures) = source_ref().captures(s) {
                return Ok(FlowTarget {
                    to: captures[1].trim().to_string(),
                    input: Some(captures[2].to_string()),
                    ..Default::default()
                });
            }
            Ok(FlowTarget {
                to: s.to_string(),
                ..Default::default()
            })
        }
        Value::Object(map) => Ok(FlowTarget {
            to: map
                .get("to")
                .and_then(Value::as_str)
                .ok_or_else(|| DiagramError::parse("readable", "flow target missing 'to'"))?
                .to_string(),
            input: map.get("in").and_then(Value::as_str).map(String::from),
            content_type: map.get("as").and_then(Value::as_str).map(String::from),
            naming: map.get("naming").and_then(Value::as_str).map(String::from),
        }),
        other => Err(DiagramError::parse(
            "readable",
            format!("flow target must be a string or map, got {other}"),
        )),
    }
}

impl FormatStrategy for ReadableStrategy {
    fn format(&self) -> DiagramFormat {
        DiagramFormat::Readable
    }

    fn quick_match(&self, content: &str) -> bool {
        content.contains("version: readable") || content.contains("flow:")
    }

    fn detect_confidence(&self, content: &str) -> f32 {
        match serde_yaml::from_str::<ReadableDocument>(content) {
            Ok(doc) => {
                if doc.version.as_deref() == Some("readable") {
                    1.0
                } else if !doc.flow.is_empty() {
                    0.8
                } else {
                    0.1
                }
            }
            Err(_) => 0.0,
        }
    }

    fn deserialize_to_domain(&self, content: &str, path: Option<&str>) -> Result<DomainDiagram> {
        let doc: ReadableDocument = serde_yaml::from_str(content)?;
        let header = node_header();

        let mut diagram = DomainDiagram {
            metadata: DiagramMetadata {
                name: doc.name,
                version: Some("readable".to_string()),
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
        for (index, entry) in doc.nodes.iter().enumerate() {
            let (raw_header, body) = entry.iter().next().ok_or_else(|| {
                DiagramError::parse("readable", "empty node entry")
            })?;
            if entry.len() != 1 {
                return Err(DiagramError::parse(
                    "readable",
                    "node entries must have exactly one header key",
                ));
            }

            let (label, position) = match header.captures(raw_header) {
                Some(captures) => (
                    captures[1].trim().to_string(),
                    Position::new(
                        captures[2].parse().unwrap_or(0.0),
                        captures[3].parse().unwrap_or(0.0),
                    ),
                ),
                None => (raw_header.trim().to_string(), Position::default()),
            };

            let type_name = body
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    DiagramError::parse("readable", format!("node '{label}' missing type"))
                })?;
            let node_type: NodeType = type_name.parse()?;

            let node_id = NodeId::new(format!("node_{index}"));
            if label_to_id.insert(label.clone(), node_id.clone()).is_some() {
                return Err(DiagramError::parse(
                    "readable",
                    format!("duplicate node label '{label}'"),
                ));
            }
            node_types.insert(node_id.clone(), node_type);

            let mut data = body.clone();
            data.remove("type");
            let mut data = nest_dotted_keys(data);
            data.insert("label".to_string(), Value::String(label));
            diagram.nodes.push(DomainNode {
                id: node_id,
                node_type,
                position,
                data,
            });
        }

        for (index, entry) in doc.flow.iter().enumerate() {
            let (raw_source, raw_target) = entry.iter().next().ok_or_else(|| {
                DiagramError::parse("readable", "empty flow entry")
            })?;

            let (source_label, source_handle_name) = match source_ref().captures(raw_source) {
                Some(captures) => (
                    captures[1].trim().to_string(),
                    Some(captures[2].to_string()),
                ),
                None => (raw_source.trim().to_string(), None),
            };
            let source_node = label_to_id.get(&source_label).ok_or_else(|| {
                DiagramError::connection(format!("unknown node label '{source_label}'"))
            })?;
            let source_handle = match source_handle_name {
                Some(name) => validate_bracket_syntax(
                    &source_label,
                    &name,
                    node_types[source_node],
                    HandleDirection::Output,
                )?,
                None => HandleLabel::Default,
            };

            let target = parse_target(raw_target)?;
            let target_node = label_to_id.get(&target.to).ok_or_else(|| {
                DiagramError::connection(format!("unknown node label '{}'", target.to))
            })?;
            let target_handle = match &target.input {
                Some(name) => validate_bracket_syntax(
                    &target.to,
                    name,
                    node_types[target_node],
                    HandleDirection::Input,
                )?,
                None => HandleLabel::Default,
            };

            let content_type = target
                .content_type
                .as_deref()
                .map(ArrowContentType::from_str)
                .transpose()?;

            let source_node = source_node.clone();
            let target_node = target_node.clone();
            ensure_handle(&mut diagram, &source_node, source_handle, HandleDirection::Output);
            ensure_handle(&mut diagram, &target_node, target_handle, HandleDirection::Input);

            diagram.arrows.push(DomainArrow {
                id: ArrowId::new(format!("arrow_{index}")),
                source: create_handle_id(&source_node, source_handle, HandleDirection::Output),
                target: create_handle_id(&target_node, target_handle, HandleDirection::Input),
                content_type,
                label: target.naming,
                data: Map::new(),
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
        doc.insert("version".into(), "readable".into());
        if let Some(name) = &diagram.metadata.name {
            doc.insert("name".into(), name.clone().into());
        }

        if !diagram.persons.is_empty() {
            let mut persons = serde_yaml::Mapping::new();
            for person in &diagram.persons {
                let mut entry = serde_yaml::Mapping::new();
                entry.insert("service".into(), person.llm_config.service.clone().into());
                entry.insert("model".into(), person.llm_config.model.clone().into());
                if let Some(key) = &person.llm_config.api_key_id {
                    entry.insert("api_key_id".into(), key.to_string().into());
                }
                if let Some(prompt) = &person.llm_config.system_prompt {
                    entry.insert("system_prompt".into(), prompt.clone().into());
                }
                persons.insert(
                    person.label.clone().into(),
                    serde_yaml::Value::Mapping(entry),
                );
            }
            doc.insert("persons".into(), serde_yaml::Value::Mapping(persons));
        }

        let mut nodes = Vec::new();
        for node in &diagram.nodes {
            let header = format!(
                "{} @({},{})",
                node.label(),
                node.position.x,
                node.position.y
            );
            let mut body = node.data.clone();
            body.remove("label");
            body.insert(
                "type".to_string(),
                Value::String(node.node_type.as_str().to_string()),
            );
            let mut entry = serde_yaml::Mapping::new();
            entry.insert(header.into(), serde_yaml::to_value(Value::Object(body))?);
            nodes.push(serde_yaml::Value::Mapping(entry));
        }
        doc.insert("nodes".into(), serde_yaml::Value::Sequence(nodes));

        let mut flow = Vec::new();
        for arrow in &diagram.arrows {
            let source = parse_handle_id(&arrow.source)?;
            let target = parse_handle_id(&arrow.target)?;
            let source_label = id_to_label.get(&source.node_id).cloned().ok_or_else(|| {
                DiagramError::connection(format!("arrow '{}' source node missing", arrow.id))
            })?;
            let target_label = id_to_label.get(&target.node_id).cloned().ok_or_else(|| {
                DiagramError::connection(format!("arrow '{}' target node missing", arrow.id))
            })?;

            let source_key = if source.label == HandleLabel::Default {
                source_label
            } else {
                format!("{source_label} [{}]", source.label)
            };

            let plain = target.label == HandleLabel::Default
                && arrow.content_type.is_none()
                && arrow.label.is_none();
            let target_value: serde_yaml::Value = if plain {
                target_label.into()
            } else {
                let mut annotated = format!("to \"{target_label}\"");
                if target.label != HandleLabel::Default {
                    annotated.push_str(&format!(" in \"{}\"", target.label));
                }
                if let Some(content_type) = arrow.content_type {
                    annotated.push_str(&format!(" as \"{}\"", content_type.as_str()));
                }
                if let Some(label) = &arrow.label {
                    annotated.push_str(&format!(" naming \"{label}\""));
                }
                annotated.into()
            };

            let mut entry = serde_yaml::Mapping::new();
            entry.insert(source_key.into(), target_value);
            flow.push(serde_yaml::Value::Mapping(entry));
        }
        doc.insert("flow".into(), serde_yaml::Value::Sequence(flow));

        Ok(serde_yaml::to_string(&serde_yaml::Value::Mapping(doc))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READABLE: &str = r#"
version: readable
name: branching
nodes:
  - "Start @(0,0)":
      type: start
  - "Gate @(120,40)":
      type: condition
      expression: "x > 5"
  - "Yes @(240,0)":
      type: endpoint
  - "No @(240,80)":
      type: endpoint
flow:
  - Start: Gate
  - "Gate [condtrue]": 'to "Yes" as "raw_text" naming "verdict"'
  - "Gate [condfalse]": No
"#;

    #[test]
    fn test_parse_readable() {
        let diagram = ReadableStrategy.deserialize_to_domain(READABLE, None).unwrap();
        assert_eq!(diagram.nodes.len(), 4);
        assert_eq!(diagram.arrows.len(), 3);

        let gate = diagram.nodes.iter().find(|n| n.label() == "Gate").unwrap();
        assert_eq!(gate.position, Position::new(120.0, 40.0));
        assert_eq!(gate.data["expression"], Value::String("x > 5".into()));

        let verdict = &diagram.arrows[1];
        assert!(verdict.source.as_str().ends_with("_condtrue_output"));
        assert_eq!(verdict.content_type, Some(ArrowContentType::RawText));
        assert_eq!(verdict.label.as_deref(), Some("verdict"));
    }

    #[test]
    fn test_header_without_position() {
        let content = r#"
version: readable
nodes:
  - "Solo":
      type: start
flow: []
"#;
        let diagram = ReadableStrategy.deserialize_to_domain(content, None).unwrap();
        assert_eq!(diagram.nodes[0].label(), "Solo");
        assert_eq!(diagram.nodes[0].position, Position::default());
    }

    #[test]
    fn test_map_shaped_flow_target() {
        let content = r#"
version: readable
nodes:
  - "A @(0,0)":
      type: start
  - "B @(1,1)":
      type: person_job
      person: Writer
flow:
  - A: {to: B, in: first, as: variable, naming: seed}
"#;
        let diagram = ReadableStrategy.deserialize_to_domain(content, None).unwrap();
        let arrow = &diagram.arrows[0];
        assert!(arrow.target.as_str().ends_with("_first_input"));
        assert_eq!(arrow.content_type, Some(ArrowContentType::Variable));
        assert_eq!(arrow.label.as_deref(), Some("seed"));
    }

    #[test]
    fn test_invalid_bracket_handle_fails() {
        let bad = READABLE.replace("[condtrue]", "[bogus]");
        assert!(ReadableStrategy.deserialize_to_domain(&bad, None).is_err());
    }

    #[test]
    fn test_round_trip_semantically_equal() {
        let diagram = ReadableStrategy.deserialize_to_domain(READABLE, None).unwrap();
        let serialized = ReadableStrategy.serialize_from_domain(&diagram).unwrap();
        let back = ReadableStrategy
            .deserialize_to_domain(&serialized, None)
            .unwrap();
        assert_eq!(back.nodes.len(), diagram.nodes.len());
        for (a, b) in diagram.arrows.iter().zip(back.arrows.iter()) {
            assert_eq!(a.source, b.source);
            assert_eq!(a.target, b.target);
            assert_eq!(a.content_type, b.content_type);
            assert_eq!(a.label, b.label);
        }
    }

    #[test]
    fn test_detection() {
        assert!(ReadableStrategy.quick_match(READABLE));
        assert_eq!(ReadableStrategy.detect_confidence(READABLE), 1.0);
    }
}
