//! `sub_diagram` handler: run a child diagram as its own execution.
//!
//! The child gets a fresh `ExecutionID`, state record, and event stream;
//! `input_mapping` renames parent input labels into child variables and
//! `output_mapping` renames child outputs back. Batch mode iterates an
//! input array, each item becoming one child run.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::keys::{DIAGRAM_RUNNER, FILESYSTEM_ADAPTER};
use crate::request::ExecutionRequest;
use crate::runner::{DiagramRunner, SubDiagramRequest};
use async_trait::async_trait;
use dipeo_compiler::{compile_with_options, CompileOptions, ExecutableDiagram};
use dipeo_domain::{DomainDiagram, Envelope, NodeType, Status, SubDiagramData};
use futures::stream::{self, StreamExt};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

const BATCH_CONCURRENCY: usize = 8;

pub struct SubDiagramHandler;

impl SubDiagramHandler {
    async fn load_child(
        data: &SubDiagramData,
        req: &ExecutionRequest,
    ) -> Result<Arc<ExecutableDiagram>> {
        let options = CompileOptions {
            as_sub_diagram: true,
            ..Default::default()
        };

        if let Some(inline) = &data.diagram_data {
            let domain: DomainDiagram = serde_json::from_value(inline.clone())?;
            return Ok(Arc::new(compile_with_options(&domain, &options)?));
        }

        let name = data.diagram_name.as_ref().ok_or_else(|| {
            EngineError::node_execution(
                req.node.id.clone(),
                "sub_diagram requires diagram_name or diagram_data",
                "validation",
            )
        })?;
        let fs = req.services.resolve(FILESYSTEM_ADAPTER)?;
        let content = fs.read_to_string(Path::new(name)).await?;
        let domain = dipeo_diagram::deserialize_to_domain(
            &content,
            data.diagram_format.as_deref(),
            Some(name),
        )?;
        Ok(Arc::new(compile_with_options(&domain, &options)?))
    }

    /// Parent input labels become child variables per `input_mapping`;
    /// an empty mapping passes everything through under its own key.
    fn child_variables(data: &SubDiagramData, inputs: &Value) -> BTreeMap<String, Value> {
        let mut variables = BTreeMap::new();
        let Value::Object(input_map) = inputs else {
            return variables;
        };
        if data.input_mapping.is_empty() {
            for (k, v) in input_map {
                variables.insert(k.clone(), v.clone());
            }
            return variables;
        }
        for (parent_key, child_var) in &data.input_mapping {
            if let Some(value) = input_map.get(parent_key) {
                variables.insert(child_var.clone(), value.clone());
            }
        }
        variables
    }

    /// Child output keys become parent keys per `output_mapping`.
    fn map_outputs(data: &SubDiagramData, outputs: BTreeMap<String, Value>) -> Value {
        if data.output_mapping.is_empty() {
            return Value::Object(outputs.into_iter().collect());
        }
        let mut mapped = Map::new();
        for (child_key, parent_key) in &data.output_mapping {
            if let Some(value) = outputs.get(child_key) {
                mapped.insert(parent_key.clone(), value.clone());
            }
        }
        Value::Object(mapped)
    }

    async fn run_once(
        runner: &Arc<dyn DiagramRunner>,
        child: Arc<ExecutableDiagram>,
        data: &SubDiagramData,
        req: &ExecutionRequest,
        variables: BTreeMap<String, Value>,
    ) -> Result<Value> {
        let result = runner
            .run_sub_diagram(
                child,
                SubDiagramRequest {
                    parent_execution_id: req.execution_id.clone(),
                    variables,
                    isolate_conversation: data.isolate_conversation,
                    cancel: req.cancel.clone(),
                },
            )
            .await?;

        if !result.status.is_success() {
            return Err(EngineError::node_execution(
                req.node.id.clone(),
                format!(
                    "child execution {} ended {}: {}",
                    result.execution_id,
                    result.status,
                    result.error.unwrap_or_default()
                ),
                "sub_diagram",
            ));
        }
        Ok(Self::map_outputs(data, result.outputs))
    }
}

#[async_trait]
impl NodeHandler for SubDiagramHandler {
    fn node_type(&self) -> NodeType {
        NodeType::SubDiagram
    }

    fn validate(&self, req: &ExecutionRequest) -> std::result::Result<(), String> {
        if let dipeo_domain::NodeData::SubDiagram(data) = &req.node.data {
            if data.diagram_name.is_none() && data.diagram_data.is_none() {
                return Err("sub_diagram requires diagram_name or diagram_data".to_string());
            }
        }
        Ok(())
    }

    async fn pre_execute(&self, req: &ExecutionRequest) -> Result<Option<Envelope>> {
        let data = expect_data!(req, SubDiagram);
        if data.ignore_if_sub && req.is_sub_diagram {
            tracing::debug!(node = %req.node.id, "sub_diagram is a no-op when nested");
            return Ok(Some(Envelope::json(
                json!({"skipped": true}),
                req.node.id.clone(),
                req.execution_id.clone(),
            )));
        }
        Ok(None)
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, SubDiagram);
        let runner = req.services.resolve(DIAGRAM_RUNNER)?;
        let child = Self::load_child(data, req).await?;

        if !data.batch {
            let variables = Self::child_variables(data, &inputs);
            return Self::run_once(&runner, child, data, req, variables).await;
        }

        let items: Vec<Value> = inputs
            .get(&data.batch_input_key)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                EngineError::node_execution(
                    req.node.id.clone(),
                    format!("batch input key '{}' is not an array", data.batch_input_key),
                    "validation",
                )
            })?;

        let concurrency = if data.batch_parallel {
            BATCH_CONCURRENCY
        } else {
            1
        };
        let results: Vec<Value> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let runner = runner.clone();
                let child = child.clone();
                let mut variables = Self::child_variables(data, &inputs);
                variables.insert("item".to_string(), item);
                variables.insert("index".to_string(), json!(index));
                async move {
                    match Self::run_once(&runner, child, data, req, variables).await {
                        Ok(mut value) => {
                            if let Value::Object(map) = &mut value {
                                map.insert("index".to_string(), json!(index));
                            }
                            value
                        }
                        // A failed item stays in the array; the rest go on.
                        Err(e) => json!({"error": e.to_string(), "index": index}),
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let all_failed =
            !results.is_empty() && results.iter().all(|r| r.get("error").is_some());
        if all_failed {
            return Err(EngineError::node_execution(
                req.node.id.clone(),
                "every batch item failed",
                "batch",
            ));
        }
        Ok(Value::Array(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::SubDiagramResult;
    use crate::testing::request_with_services;
    use dipeo_domain::{ExecutionId, NodeData};
    use parking_lot::Mutex;

    /// Runner double that records requests and returns scripted outputs.
    struct ScriptedRunner {
        outputs: Mutex<Vec<SubDiagramResult>>,
        pub requests: Mutex<Vec<BTreeMap<String, Value>>>,
    }

    impl ScriptedRunner {
        fn returning(outputs: Vec<SubDiagramResult>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn ok(outputs: BTreeMap<String, Value>) -> SubDiagramResult {
            SubDiagramResult {
                execution_id: ExecutionId::new("exec_child"),
                status: Status::Completed,
                outputs,
                error: None,
            }
        }
    }

    #[async_trait]
    impl DiagramRunner for ScriptedRunner {
        async fn run_sub_diagram(
            &self,
            _diagram: Arc<ExecutableDiagram>,
            request: SubDiagramRequest,
        ) -> Result<SubDiagramResult> {
            self.requests.lock().push(request.variables);
            let mut outputs = self.outputs.lock();
            if outputs.is_empty() {
                return Err(EngineError::service("no scripted result", false));
            }
            Ok(outputs.remove(0))
        }
    }

    fn inline_child() -> Value {
        json!({
            "nodes": [
                {"id": "s", "type": "start", "position": {"x": 0.0, "y": 0.0}, "data": {}},
                {"id": "e", "type": "endpoint", "position": {"x": 0.0, "y": 0.0},
                 "data": {"label": "out"}}
            ],
            "arrows": [
                {"id": "a1", "source": "s_default_output", "target": "e_default_input"}
            ],
            "handles": [],
            "persons": []
        })
    }

    fn sub_node(data: SubDiagramData) -> NodeData {
        NodeData::SubDiagram(SubDiagramData {
            diagram_data: Some(inline_child()),
            ..data
        })
    }

    #[tokio::test]
    async fn test_input_and_output_mapping() {
        let mut child_outputs = BTreeMap::new();
        child_outputs.insert("out".to_string(), json!({"value": 7}));
        let runner = ScriptedRunner::returning(vec![ScriptedRunner::ok(child_outputs)]);

        let req = request_with_services(
            sub_node(SubDiagramData {
                input_mapping: [("payload".to_string(), "in".to_string())].into(),
                output_mapping: [("out".to_string(), "result".to_string())].into(),
                ..Default::default()
            }),
            {
                let runner = runner.clone();
                move |services| {
                    services.register(DIAGRAM_RUNNER, runner as Arc<dyn DiagramRunner>);
                }
            },
        );

        let out = SubDiagramHandler
            .run(json!({"payload": {"x": 1}}), &req)
            .await
            .unwrap();
        assert_eq!(out, json!({"result": {"value": 7}}));
        // parent input renamed into the child variable
        assert_eq!(runner.requests.lock()[0]["in"], json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_ignore_if_sub_short_circuits() {
        let runner = ScriptedRunner::returning(vec![]);
        let mut req = request_with_services(
            sub_node(SubDiagramData {
                ignore_if_sub: true,
                ..Default::default()
            }),
            move |services| {
                services.register(DIAGRAM_RUNNER, runner as Arc<dyn DiagramRunner>);
            },
        );
        req.is_sub_diagram = true;
        let envelope = SubDiagramHandler.pre_execute(&req).await.unwrap().unwrap();
        assert_eq!(envelope.as_json().unwrap(), &json!({"skipped": true}));
    }

    #[tokio::test]
    async fn test_batch_partial_failure_keeps_going() {
        let mut ok = BTreeMap::new();
        ok.insert("out".to_string(), json!("fine"));
        // One success, then the runner runs dry and errors for item 1.
        let runner = ScriptedRunner::returning(vec![ScriptedRunner::ok(ok)]);

        let req = request_with_services(
            sub_node(SubDiagramData {
                batch: true,
                ..Default::default()
            }),
            {
                let runner = runner.clone();
                move |services| {
                    services.register(DIAGRAM_RUNNER, runner as Arc<dyn DiagramRunner>);
                }
            },
        );

        let out = SubDiagramHandler
            .run(json!({"items": [1, 2]}), &req)
            .await
            .unwrap();
        let results = out.as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].get("error").is_none());
        assert!(results[1].get("error").is_some());
        assert_eq!(results[1]["index"], 1);
    }

    #[tokio::test]
    async fn test_failed_child_fails_node() {
        let runner = ScriptedRunner::returning(vec![SubDiagramResult {
            execution_id: ExecutionId::new("exec_child"),
            status: Status::Failed,
            outputs: BTreeMap::new(),
            error: Some("child broke".into()),
        }]);
        let req = request_with_services(sub_node(SubDiagramData::default()), move |services| {
            services.register(DIAGRAM_RUNNER, runner as Arc<dyn DiagramRunner>);
        });
        let err = SubDiagramHandler.run(json!({}), &req).await.unwrap_err();
        assert!(err.to_string().contains("child broke"));
    }
}
