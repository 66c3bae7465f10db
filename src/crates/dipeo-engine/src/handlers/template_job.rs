//! `template_job` handler: minijinja render of inline or file templates.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::keys::FILESYSTEM_ADAPTER;
use crate::request::ExecutionRequest;
use async_trait::async_trait;
use dipeo_domain::{NodeData, NodeType};
use serde_json::Value;
use std::path::Path;

pub struct TemplateJobHandler;

#[async_trait]
impl NodeHandler for TemplateJobHandler {
    fn node_type(&self) -> NodeType {
        NodeType::TemplateJob
    }

    fn validate(&self, req: &ExecutionRequest) -> std::result::Result<(), String> {
        if let NodeData::TemplateJob(data) = &req.node.data {
            if data.template_path.is_none() && data.template_content.is_none() {
                return Err(
                    "template_job requires template_path or template_content".to_string()
                );
            }
        }
        Ok(())
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, TemplateJob);

        let template = match (&data.template_content, &data.template_path) {
            (Some(content), _) => content.clone(),
            (None, Some(path)) => {
                let fs = req.services.resolve(FILESYSTEM_ADAPTER)?;
                fs.read_to_string(Path::new(path)).await?
            }
            (None, None) => unreachable!("checked in validate"),
        };

        // Scope: node-declared variables under the execution scope, inputs
        // on top.
        let mut scope = req.template_scope(&inputs);
        if let Value::Object(scope_map) = &mut scope {
            for (k, v) in &data.variables {
                scope_map.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        let mut env = minijinja::Environment::new();
        env.add_template("template", &template)?;
        let rendered = env.get_template("template")?.render(&scope)?;

        if let Some(output_path) = &data.output_path {
            let fs = req.services.resolve(FILESYSTEM_ADAPTER)?;
            fs.write(Path::new(output_path), rendered.as_bytes()).await?;
            tracing::debug!(node = %req.node.id, file = %output_path, "template rendered to file");
        }

        Ok(Value::String(rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::MemoryFileSystem;
    use crate::ports::FileSystem;
    use crate::testing::request_with_services;
    use dipeo_domain::TemplateJobData;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_renders_inline_template_with_inputs() {
        let mut req = request_with_services(
            NodeData::TemplateJob(TemplateJobData {
                template_content: Some("Hello {{ name }}, round {{ iteration }}".into()),
                ..Default::default()
            }),
            |_| {},
        );
        req.iteration = 2;
        let out = TemplateJobHandler
            .run(json!({"name": "world"}), &req)
            .await
            .unwrap();
        assert_eq!(out, json!("Hello world, round 2"));
    }

    #[tokio::test]
    async fn test_template_file_and_output_file() {
        let fs = Arc::new(MemoryFileSystem::with_files([(
            "tpl/report.j2",
            b"total: {{ total }}".to_vec(),
        )]));
        let req = request_with_services(
            NodeData::TemplateJob(TemplateJobData {
                template_path: Some("tpl/report.j2".into()),
                output_path: Some("out/report.txt".into()),
                ..Default::default()
            }),
            {
                let fs = fs.clone();
                move |services| {
                    services.register(FILESYSTEM_ADAPTER, fs as Arc<dyn FileSystem>);
                }
            },
        );
        let out = TemplateJobHandler.run(json!({"total": 7}), &req).await.unwrap();
        assert_eq!(out, json!("total: 7"));
        assert_eq!(fs.contents("out/report.txt").unwrap(), "total: 7");
    }

    #[tokio::test]
    async fn test_node_variables_fill_gaps() {
        let req = request_with_services(
            NodeData::TemplateJob(TemplateJobData {
                template_content: Some("{{ greeting }} {{ name }}".into()),
                variables: match json!({"greeting": "hi"}) {
                    Value::Object(m) => m,
                    _ => unreachable!(),
                },
                ..Default::default()
            }),
            |_| {},
        );
        let out = TemplateJobHandler
            .run(json!({"name": "there"}), &req)
            .await
            .unwrap();
        assert_eq!(out, json!("hi there"));
    }

    #[tokio::test]
    async fn test_bad_template_is_typed_error() {
        let req = request_with_services(
            NodeData::TemplateJob(TemplateJobData {
                template_content: Some("{{ unclosed".into()),
                ..Default::default()
            }),
            |_| {},
        );
        let err = TemplateJobHandler.run(json!({}), &req).await.unwrap_err();
        assert!(matches!(err, EngineError::Template(_)));
    }
}
