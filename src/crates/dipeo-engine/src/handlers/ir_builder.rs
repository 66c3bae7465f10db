//! `ir_builder` handler: codegen intermediate representation.
//!
//! Consumes a declaration summary (usually from a `typescript_ast` node)
//! and produces the deterministic JSON tables the code generators read:
//! node-spec entries or operation tables, keyed and sorted by name.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::request::ExecutionRequest;
use async_trait::async_trait;
use dipeo_domain::NodeType;
use serde_json::{json, Map, Value};

pub struct IrBuilderHandler;

impl IrBuilderHandler {
    fn names_of(ast: &Value, key: &str) -> Vec<String> {
        let mut names: Vec<String> = ast
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.get("name").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names.dedup();
        names
    }

    fn build_node_specs(ast: &Value) -> Value {
        let specs: Vec<Value> = Self::names_of(ast, "interfaces")
            .into_iter()
            .map(|name| {
                json!({
                    "name": name,
                    "node_type": to_snake_case(&name),
                })
            })
            .collect();
        json!({"node_specs": specs})
    }

    fn build_operations(ast: &Value) -> Value {
        let operations: Vec<Value> = Self::names_of(ast, "functions")
            .into_iter()
            .map(|name| json!({"name": name, "operation": to_snake_case(&name)}))
            .collect();
        json!({"operations": operations})
    }

    fn build_enums(ast: &Value) -> Value {
        json!({"enums": Self::names_of(ast, "enums")})
    }
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[async_trait]
impl NodeHandler for IrBuilderHandler {
    fn node_type(&self) -> NodeType {
        NodeType::IrBuilder
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, IrBuilder);

        let ast = match &inputs {
            Value::Object(map) if map.len() == 1 => map.values().next().unwrap().clone(),
            other => other.clone(),
        };
        if !ast.is_object() {
            return Err(EngineError::node_execution(
                req.node.id.clone(),
                "ir_builder requires an AST object input",
                "validation",
            ));
        }

        let builder_type = data.builder_type.as_deref().unwrap_or("node_specs");
        let mut ir = match builder_type {
            "node_specs" => Self::build_node_specs(&ast),
            "graphql_operations" | "operations" => Self::build_operations(&ast),
            "enums" => Self::build_enums(&ast),
            other => {
                return Err(EngineError::node_execution(
                    req.node.id.clone(),
                    format!("unknown builder_type '{other}'"),
                    "validation",
                ))
            }
        };

        if let Value::Object(map) = &mut ir {
            let mut meta = Map::new();
            meta.insert("builder_type".to_string(), json!(builder_type));
            if let Some(source_type) = &data.source_type {
                meta.insert("source_type".to_string(), json!(source_type));
            }
            map.insert("metadata".to_string(), Value::Object(meta));
        }
        Ok(ir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::request_for;
    use dipeo_domain::{IrBuilderData, NodeData};

    fn builder(builder_type: &str) -> NodeData {
        NodeData::IrBuilder(IrBuilderData {
            builder_type: Some(builder_type.to_string()),
            ..Default::default()
        })
    }

    fn sample_ast() -> Value {
        json!({
            "interfaces": [{"name": "PersonJobNode"}, {"name": "ApiJobNode"}],
            "functions": [{"name": "executeDiagram"}],
            "enums": [{"name": "Status"}],
        })
    }

    #[tokio::test]
    async fn test_node_specs_sorted_and_snake_cased() {
        let req = request_for(builder("node_specs"));
        let ir = IrBuilderHandler
            .run(json!({"default": sample_ast()}), &req)
            .await
            .unwrap();
        let specs = ir["node_specs"].as_array().unwrap();
        assert_eq!(specs[0]["name"], "ApiJobNode");
        assert_eq!(specs[0]["node_type"], "api_job_node");
        assert_eq!(specs[1]["name"], "PersonJobNode");
        assert_eq!(ir["metadata"]["builder_type"], "node_specs");
    }

    #[tokio::test]
    async fn test_operations_builder() {
        let req = request_for(builder("operations"));
        let ir = IrBuilderHandler.run(sample_ast(), &req).await.unwrap();
        assert_eq!(ir["operations"][0]["operation"], "execute_diagram");
    }

    #[tokio::test]
    async fn test_deterministic_output() {
        let req = request_for(builder("enums"));
        let a = IrBuilderHandler.run(sample_ast(), &req).await.unwrap();
        let b = IrBuilderHandler.run(sample_ast(), &req).await.unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[tokio::test]
    async fn test_non_object_input_rejected() {
        let req = request_for(builder("node_specs"));
        assert!(IrBuilderHandler.run(json!("text"), &req).await.is_err());
    }
}
