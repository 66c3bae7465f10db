//! Node handler lifecycle and registry.
//!
//! Every handler implements up to six phases; unused phases fall back to
//! the defaults here. The engine drives the sequence and converts errors
//! into error envelopes — handlers never decide execution-level fate.

use crate::error::{EngineError, Result};
use crate::request::{ExecutionRequest, Inputs};
use async_trait::async_trait;
use dipeo_domain::{meta_keys, Envelope, NodeType};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Shape an inputs map into the plain JSON dict most handlers consume.
pub fn inputs_to_value(inputs: &Inputs) -> Value {
    let mut map = serde_json::Map::new();
    for (key, envelope) in inputs {
        map.insert(key.clone(), envelope.body_value());
    }
    Value::Object(map)
}

/// Default envelope wrapping: strings become text envelopes, everything
/// else JSON.
pub fn value_to_envelope(result: Value, req: &ExecutionRequest) -> Envelope {
    match result {
        Value::String(s) => Envelope::text(s, req.node.id.clone(), req.execution_id.clone()),
        other => Envelope::json(other, req.node.id.clone(), req.execution_id.clone()),
    }
}

#[async_trait]
pub trait NodeHandler: Send + Sync {
    fn node_type(&self) -> NodeType;

    /// Static sanity check. Pure; no I/O. An error string fails the node
    /// before anything runs.
    fn validate(&self, _req: &ExecutionRequest) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Runtime setup and short-circuit. Returning an envelope makes it the
    /// node's output; `prepare_inputs`, `run` and `serialize_output` are
    /// skipped.
    async fn pre_execute(&self, _req: &ExecutionRequest) -> Result<Option<Envelope>> {
        Ok(None)
    }

    /// Decode envelopes into the handler's argument dict. Pure modulo its
    /// envelope reads.
    fn prepare_inputs(&self, _req: &ExecutionRequest, inputs: &Inputs) -> Result<Value> {
        Ok(inputs_to_value(inputs))
    }

    /// The work.
    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value>;

    /// Wrap `run`'s return into the canonical envelope and attach the
    /// output label.
    fn serialize_output(&self, result: Value, req: &ExecutionRequest) -> Result<Envelope> {
        Ok(value_to_envelope(result, req))
    }

    /// Last-mile transform on the final envelope.
    async fn post_execute(&self, _req: &ExecutionRequest, output: Envelope) -> Result<Envelope> {
        Ok(output)
    }
}

/// Drive the full lifecycle for one node run.
pub async fn run_lifecycle(
    handler: &dyn NodeHandler,
    req: &ExecutionRequest,
    inputs: &Inputs,
) -> Result<Envelope> {
    if let Err(message) = handler.validate(req) {
        return Err(EngineError::node_execution(
            req.node.id.clone(),
            message,
            "validation",
        ));
    }

    if let Some(short_circuit) = handler.pre_execute(req).await? {
        return handler.post_execute(req, short_circuit).await;
    }

    let prepared = handler.prepare_inputs(req, inputs)?;
    let result = handler.run(prepared, req).await?;
    let mut output = handler.serialize_output(result, req)?;
    if !output.meta.contains_key(meta_keys::OUTPUT_LABEL) {
        output = output.with_meta(meta_keys::OUTPUT_LABEL, Value::String("default".into()));
    }
    handler.post_execute(req, output).await
}

/// Maps node type to handler. Built once at startup; read-only afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeType, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler.node_type(), handler);
    }

    pub fn get(&self, node_type: NodeType) -> Result<Arc<dyn NodeHandler>> {
        self.handlers
            .get(&node_type)
            .cloned()
            .ok_or_else(|| EngineError::MissingHandler(node_type.to_string()))
    }

    pub fn registered_types(&self) -> Vec<NodeType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}
