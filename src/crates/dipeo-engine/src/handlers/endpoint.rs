//! `endpoint` handler: collects the final value, optionally persisting it
//! through the filesystem port.

use super::expect_data;
use crate::error::Result;
use crate::handler::NodeHandler;
use crate::keys::FILESYSTEM_ADAPTER;
use crate::request::{ExecutionRequest, Inputs};
use async_trait::async_trait;
use dipeo_domain::NodeType;
use serde_json::Value;
use std::path::Path;

pub struct EndpointHandler;

#[async_trait]
impl NodeHandler for EndpointHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Endpoint
    }

    fn prepare_inputs(&self, _req: &ExecutionRequest, inputs: &Inputs) -> Result<Value> {
        // A single input collapses to its value; fan-in keeps the keyed map.
        if inputs.len() == 1 {
            let envelope = inputs.values().next().unwrap();
            return Ok(envelope.body_value());
        }
        Ok(crate::handler::inputs_to_value(inputs))
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, Endpoint);
        if data.save_to_file {
            if let Some(file_name) = &data.file_name {
                let fs = req.services.resolve(FILESYSTEM_ADAPTER)?;
                let rendered = match &inputs {
                    Value::String(s) => s.clone(),
                    other => serde_json::to_string_pretty(other)?,
                };
                fs.write(Path::new(file_name), rendered.as_bytes()).await?;
                tracing::debug!(node = %req.node.id, file = %file_name, "endpoint result saved");
            }
        }
        Ok(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::FILESYSTEM_ADAPTER;
    use crate::ports::mock::MemoryFileSystem;
    use crate::ports::FileSystem;
    use crate::testing::{request_for, request_with_services};
    use dipeo_domain::{EndpointData, Envelope, NodeData, NodeId};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_single_input_collapses() {
        let req = request_for(NodeData::Endpoint(EndpointData::default()));
        let mut inputs = Inputs::new();
        inputs.insert(
            "default".into(),
            Envelope::json(json!({"x": 1}), NodeId::new("src"), req.execution_id.clone()),
        );
        let prepared = EndpointHandler.prepare_inputs(&req, &inputs).unwrap();
        assert_eq!(prepared, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_save_to_file() {
        let fs = Arc::new(MemoryFileSystem::default());
        let req = request_with_services(
            NodeData::Endpoint(EndpointData {
                save_to_file: true,
                file_name: Some("out/result.json".into()),
            }),
            |services| {
                services.register(
                    FILESYSTEM_ADAPTER,
                    fs.clone() as Arc<dyn FileSystem>,
                );
            },
        );
        let out = EndpointHandler.run(json!({"x": 1}), &req).await.unwrap();
        assert_eq!(out, json!({"x": 1}));
        assert!(fs.contents("out/result.json").unwrap().contains("\"x\""));
    }
}
