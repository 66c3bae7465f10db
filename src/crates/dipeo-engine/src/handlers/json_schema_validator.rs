//! `json_schema_validator` handler: gate values on a JSON Schema.
//!
//! Valid input passes through unchanged. Invalid input fails the node; in
//! strict mode the first violation short-circuits, otherwise every
//! violation is collected into the error message.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::keys::FILESYSTEM_ADAPTER;
use crate::request::ExecutionRequest;
use async_trait::async_trait;
use dipeo_domain::{NodeData, NodeType};
use serde_json::Value;
use std::path::Path;

pub struct JsonSchemaValidatorHandler;

#[async_trait]
impl NodeHandler for JsonSchemaValidatorHandler {
    fn node_type(&self) -> NodeType {
        NodeType::JsonSchemaValidator
    }

    fn validate(&self, req: &ExecutionRequest) -> std::result::Result<(), String> {
        if let NodeData::JsonSchemaValidator(data) = &req.node.data {
            if data.json_schema.is_none() && data.schema_path.is_none() {
                return Err("json_schema_validator requires json_schema or schema_path".into());
            }
        }
        Ok(())
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, JsonSchemaValidator);

        let schema_value = match (&data.json_schema, &data.schema_path) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => {
                let fs = req.services.resolve(FILESYSTEM_ADAPTER)?;
                serde_json::from_str(&fs.read_to_string(Path::new(path)).await?)?
            }
            (None, None) => unreachable!("checked in validate"),
        };

        let schema = jsonschema::JSONSchema::compile(&schema_value).map_err(|e| {
            EngineError::node_execution(
                req.node.id.clone(),
                format!("invalid schema: {e}"),
                "validation",
            )
        })?;

        let instance = match &inputs {
            Value::Object(map) if map.len() == 1 => map.values().next().unwrap().clone(),
            other => other.clone(),
        };

        let violations: Vec<String> = match schema.validate(&instance) {
            Ok(()) => Vec::new(),
            Err(errors) => {
                if data.strict_mode {
                    errors
                        .take(1)
                        .map(|e| format!("{} at {}", e, e.instance_path))
                        .collect()
                } else {
                    errors
                        .map(|e| format!("{} at {}", e, e.instance_path))
                        .collect()
                }
            }
        };

        if !violations.is_empty() {
            return Err(EngineError::node_execution(
                req.node.id.clone(),
                format!("schema validation failed: {}", violations.join("; ")),
                "schema",
            ));
        }

        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::request_for;
    use dipeo_domain::JsonSchemaValidatorData;
    use serde_json::json;

    fn validator(schema: Value, strict: bool) -> NodeData {
        NodeData::JsonSchemaValidator(JsonSchemaValidatorData {
            json_schema: Some(schema),
            schema_path: None,
            strict_mode: strict,
        })
    }

    fn person_schema() -> Value {
        json!({
            "type": "object",
            "required": ["name", "age"],
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer", "minimum": 0}
            }
        })
    }

    #[tokio::test]
    async fn test_valid_input_passes_through() {
        let req = request_for(validator(person_schema(), false));
        let input = json!({"default": {"name": "ada", "age": 36}});
        let out = JsonSchemaValidatorHandler.run(input, &req).await.unwrap();
        assert_eq!(out, json!({"name": "ada", "age": 36}));
    }

    #[tokio::test]
    async fn test_invalid_input_collects_all_errors() {
        let req = request_for(validator(person_schema(), false));
        let err = JsonSchemaValidatorHandler
            .run(json!({"default": {"age": -1}}), &req)
            .await
            .unwrap_err();
        let message = err.to_string();
        // Both the missing property and the minimum violation appear.
        assert!(message.contains("name"));
        assert!(message.contains("-1") || message.contains("minimum"));
    }

    #[tokio::test]
    async fn test_strict_mode_stops_at_first_error() {
        let req = request_for(validator(person_schema(), true));
        let err = JsonSchemaValidatorHandler
            .run(json!({"default": {"age": -1}}), &req)
            .await
            .unwrap_err();
        assert_eq!(err.to_string().matches(';').count(), 0);
    }

    #[tokio::test]
    async fn test_missing_schema_fails_validation_phase() {
        let req = request_for(NodeData::JsonSchemaValidator(
            JsonSchemaValidatorData::default(),
        ));
        assert!(JsonSchemaValidatorHandler.validate(&req).is_err());
    }
}
