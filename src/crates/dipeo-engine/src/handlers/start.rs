//! `start` handler: seeds the execution with its custom data and the
//! caller-supplied variables.

use super::expect_data;
use crate::error::Result;
use crate::handler::NodeHandler;
use crate::request::ExecutionRequest;
use async_trait::async_trait;
use dipeo_domain::NodeType;
use serde_json::Value;

pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Start
    }

    async fn run(&self, _inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, Start);
        let mut out = serde_json::Map::new();
        for (k, v) in &req.variables {
            out.insert(k.clone(), v.clone());
        }
        // Node-level custom data wins over caller variables.
        for (k, v) in &data.custom_data {
            out.insert(k.clone(), v.clone());
        }
        Ok(Value::Object(out))
    }
}
