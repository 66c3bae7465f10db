//! The format strategy contract and shared importer normalization.

use crate::error::{DiagramError, Result};
use dipeo_domain::DomainDiagram;
use serde_json::{Map, Value};
use std::str::FromStr;

/// The three accepted surface syntaxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagramFormat {
    Native,
    Light,
    Readable,
}

impl DiagramFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramFormat::Native => "native",
            DiagramFormat::Light => "light",
            DiagramFormat::Readable => "readable",
        }
    }

    /// Format implied by a file extension, used by the CLI converter.
    pub fn from_path(path: &str) -> Option<Self> {
        if path.ends_with(".json") {
            Some(DiagramFormat::Native)
        } else if path.ends_with(".light.yaml") || path.ends_with(".light.yml") {
            Some(DiagramFormat::Light)
        } else if path.ends_with(".readable.yaml") || path.ends_with(".readable.yml") {
            Some(DiagramFormat::Readable)
        } else {
            None
        }
    }
}

impl FromStr for DiagramFormat {
    type Err = DiagramError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "native" | "json" => Ok(DiagramFormat::Native),
            "light" => Ok(DiagramFormat::Light),
            "readable" => Ok(DiagramFormat::Readable),
            other => Err(DiagramError::UnknownFormatName(other.to_string())),
        }
    }
}

impl std::fmt::Display for DiagramFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One surface syntax. Strategies parse to and serialize from the same
/// `DomainDiagram`; auto-detection tries `quick_match` first and falls
/// back to parse-and-score.
pub trait FormatStrategy: Send + Sync {
    fn format(&self) -> DiagramFormat;

    /// Cheap telltale-token check, no parsing.
    fn quick_match(&self, content: &str) -> bool;

    /// Parse-and-score confidence in [0, 1]; only scores above 0.5 are
    /// considered.
    fn detect_confidence(&self, content: &str) -> f32;

    fn deserialize_to_domain(&self, content: &str, path: Option<&str>) -> Result<DomainDiagram>;

    fn serialize_from_domain(&self, diagram: &DomainDiagram) -> Result<String>;
}

/// Importer normalization: `a.b.c: v` flat keys nest into objects.
pub fn nest_dotted_keys(map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        if let Some((head, rest)) = key.split_once('.') {
            let entry = out
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = entry {
                let mut nested = Map::new();
                nested.insert(rest.to_string(), value);
                for (k, v) in nest_dotted_keys(nested) {
                    inner.insert(k, v);
                }
            }
        } else {
            out.insert(key, value);
        }
    }
    out
}

/// Importer normalization: containers may be lists or ID-keyed maps;
/// canonicalize to a list, injecting the map key as `id` when missing.
pub fn list_or_map(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .into_iter()
            .map(|(key, mut item)| {
                if let Value::Object(fields) = &mut item {
                    fields
                        .entry("id".to_string())
                        .or_insert_with(|| Value::String(key));
                }
                item
            })
            .collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nest_dotted_keys() {
        let map = match json!({"batch.input_key": "items", "plain": 1, "a.b.c": true}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let nested = nest_dotted_keys(map);
        assert_eq!(nested["batch"]["input_key"], json!("items"));
        assert_eq!(nested["plain"], json!(1));
        assert_eq!(nested["a"]["b"]["c"], json!(true));
    }

    #[test]
    fn test_list_or_map_injects_ids() {
        let canonical = list_or_map(json!({
            "n1": {"type": "start"},
            "n2": {"id": "explicit", "type": "endpoint"},
        }));
        assert_eq!(canonical.len(), 2);
        assert_eq!(canonical[0]["id"], json!("n1"));
        assert_eq!(canonical[1]["id"], json!("explicit"));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            DiagramFormat::from_path("flows/main.light.yaml"),
            Some(DiagramFormat::Light)
        );
        assert_eq!(
            DiagramFormat::from_path("flows/main.json"),
            Some(DiagramFormat::Native)
        );
        assert_eq!(DiagramFormat::from_path("flows/main.txt"), None);
    }

    #[test]
    fn test_format_name_parsing() {
        assert_eq!("light".parse::<DiagramFormat>().unwrap(), DiagramFormat::Light);
        assert!("plantuml".parse::<DiagramFormat>().is_err());
    }
}
