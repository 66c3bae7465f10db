//! Native JSON strategy: the canonical domain shape.
//!
//! Containers are arrays in canonical form but ID-keyed maps are
//! accepted and normalized on import.

use crate::error::{DiagramError, Result};
use crate::strategy::{list_or_map, DiagramFormat, FormatStrategy};
use dipeo_domain::DomainDiagram;
use serde_json::{json, Value};

pub struct NativeStrategy;

impl FormatStrategy for NativeStrategy {
    fn format(&self) -> DiagramFormat {
        DiagramFormat::Native
    }

    fn quick_match(&self, content: &str) -> bool {
        content.trim_start().starts_with('{')
    }

    fn detect_confidence(&self, content: &str) -> f32 {
        match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(map)) => {
                if map.contains_key("nodes") {
                    0.9
                } else {
                    0.6
                }
            }
            _ => 0.0,
        }
    }

    fn deserialize_to_domain(&self, content: &str, path: Option<&str>) -> Result<DomainDiagram> {
        let mut root: Value = serde_json::from_str(content)
            .map_err(|e| DiagramError::parse("native", e.to_string()))?;
        let Value::Object(map) = &mut root else {
            return Err(DiagramError::parse("native", "top level must be an object"));
        };

        for container in ["nodes", "arrows", "handles", "persons"] {
            if let Some(value) = map.remove(container) {
                map.insert(container.to_string(), Value::Array(list_or_map(value)));
            }
        }

        let mut diagram: DomainDiagram = serde_json::from_value(root)
            .map_err(|e| DiagramError::parse("native", e.to_string()))?;
        if diagram.metadata.source_path.is_none() {
            diagram.metadata.source_path = path.map(String::from);
        }
        Ok(diagram)
    }

    fn serialize_from_domain(&self, diagram: &DomainDiagram) -> Result<String> {
        // source_path is import-session state, not document content.
        let mut diagram = diagram.clone();
        diagram.metadata.source_path = None;
        let mut value = serde_json::to_value(&diagram)?;
        if let Value::Object(map) = &mut value {
            map.entry("version").or_insert(json!("native"));
        }
        Ok(serde_json::to_string_pretty(&value)?)
    }
}
