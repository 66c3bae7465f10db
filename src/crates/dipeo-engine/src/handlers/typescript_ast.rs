//! `typescript_ast` handler: declaration summary of TypeScript source.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::keys::AST_PARSER;
use crate::request::ExecutionRequest;
use async_trait::async_trait;
use dipeo_domain::NodeType;
use serde_json::Value;

pub struct TypescriptAstHandler;

#[async_trait]
impl NodeHandler for TypescriptAstHandler {
    fn node_type(&self) -> NodeType {
        NodeType::TypescriptAst
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, TypescriptAst);
        let parser = req.services.resolve(AST_PARSER)?;

        // Inline source wins; otherwise the upstream node supplies it.
        let source = match &data.source {
            Some(source) => source.clone(),
            None => inputs
                .get("default")
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| inputs.as_str().map(String::from))
                .ok_or_else(|| {
                    EngineError::node_execution(
                        req.node.id.clone(),
                        "typescript_ast requires source text",
                        "validation",
                    )
                })?,
        };

        let mut ast = parser.parse(&source, data.include_jsdoc)?;

        // Optional filter to the requested declaration kinds.
        if !data.extract_patterns.is_empty() {
            if let Value::Object(map) = &mut ast {
                map.retain(|key, _| data.extract_patterns.iter().any(|p| p == key));
            }
        }
        Ok(ast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::local::RegexAstParser;
    use crate::ports::AstParser;
    use crate::testing::request_with_services;
    use dipeo_domain::{NodeData, TypescriptAstData};
    use serde_json::json;
    use std::sync::Arc;

    fn with_parser(data: TypescriptAstData) -> crate::request::ExecutionRequest {
        request_with_services(NodeData::TypescriptAst(data), |services| {
            services.register(AST_PARSER, Arc::new(RegexAstParser) as Arc<dyn AstParser>);
        })
    }

    #[tokio::test]
    async fn test_parses_inline_source() {
        let req = with_parser(TypescriptAstData {
            source: Some("export interface Foo { x: number }".into()),
            ..Default::default()
        });
        let ast = TypescriptAstHandler.run(json!({}), &req).await.unwrap();
        assert_eq!(ast["interfaces"][0]["name"], "Foo");
    }

    #[tokio::test]
    async fn test_source_from_input() {
        let req = with_parser(TypescriptAstData::default());
        let ast = TypescriptAstHandler
            .run(json!({"default": "export type Id = string;"}), &req)
            .await
            .unwrap();
        assert_eq!(ast["type_aliases"][0]["name"], "Id");
    }

    #[tokio::test]
    async fn test_extract_patterns_filter() {
        let req = with_parser(TypescriptAstData {
            source: Some("export interface A {}\nexport enum B {}".into()),
            extract_patterns: vec!["enums".into()],
            ..Default::default()
        });
        let ast = TypescriptAstHandler.run(json!({}), &req).await.unwrap();
        assert!(ast.get("interfaces").is_none());
        assert_eq!(ast["enums"][0]["name"], "B");
    }
}
