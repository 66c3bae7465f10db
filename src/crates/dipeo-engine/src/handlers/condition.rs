//! `condition` handler.
//!
//! Evaluates one of four condition kinds and emits a single envelope on
//! `condtrue` or `condfalse`. The envelope body passes the node's primary
//! input through, so downstream consumers see the value that was judged,
//! not the verdict.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::expr;
use crate::handler::NodeHandler;
use crate::keys::LLM_SERVICE;
use crate::ports::{ChatMessage, LlmRequest};
use crate::request::ExecutionRequest;
use async_trait::async_trait;
use dipeo_domain::{meta_keys, ConditionType, Envelope, NodeData, NodeType};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub struct ConditionHandler;

impl ConditionHandler {
    /// Variables in scope for `custom` expressions: execution variables
    /// overlaid with the decoded inputs.
    fn expression_scope(req: &ExecutionRequest, inputs: &Value) -> BTreeMap<String, Value> {
        let mut scope = req.variables.clone();
        if let Value::Object(map) = inputs {
            for (k, v) in map {
                scope.insert(k.clone(), v.clone());
            }
        }
        scope.insert("exec_count".to_string(), Value::from(req.iteration));
        scope
    }

    fn detect_max_iterations(req: &ExecutionRequest) -> bool {
        let mut bounded_participants = 0;
        for node_id in &req.diagram.execution_hints.loop_nodes {
            let Some(node) = req.diagram.get_node(node_id) else {
                continue;
            };
            if let NodeData::PersonJob(data) = &node.data {
                bounded_participants += 1;
                if req.exec_counts.get(node_id).copied().unwrap_or(0) < data.max_iteration {
                    return false;
                }
            }
        }
        bounded_participants > 0
    }

    fn check_nodes_executed(req: &ExecutionRequest, labels: &[String]) -> bool {
        if labels.is_empty() {
            return false;
        }
        labels.iter().all(|label| {
            req.diagram
                .nodes
                .iter()
                .find(|n| &n.label == label)
                .map(|n| req.exec_counts.get(&n.id).copied().unwrap_or(0) > 0)
                .unwrap_or(false)
        })
    }

    async fn llm_decision(req: &ExecutionRequest, inputs: &Value) -> Result<bool> {
        let data = match &req.node.data {
            NodeData::Condition(d) => d,
            _ => unreachable!("checked by caller"),
        };
        let llm = req.services.resolve(LLM_SERVICE)?;
        let person = data
            .person
            .as_ref()
            .and_then(|id| req.person(id))
            .ok_or_else(|| {
                EngineError::node_execution(
                    req.node.id.clone(),
                    "llm_decision condition requires a resolvable person",
                    "validation",
                )
            })?;

        let question = data.judge_by.clone().unwrap_or_else(|| {
            "Answer strictly yes or no: is this output acceptable?".to_string()
        });
        let mut messages = Vec::new();
        if let Some(system) = &person.llm_config.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(format!(
            "{question}\n\n{}",
            serde_json::to_string_pretty(inputs)?
        )));

        let response = llm
            .complete(LlmRequest {
                service: person.llm_config.service.clone(),
                model: person.llm_config.model.clone(),
                api_key_id: person.llm_config.api_key_id.clone(),
                messages,
            })
            .await?;

        let verdict = response.text.trim().to_lowercase();
        Ok(verdict.starts_with("yes") || verdict == "true" || verdict == "1")
    }
}

#[async_trait]
impl NodeHandler for ConditionHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Condition
    }

    fn validate(&self, req: &ExecutionRequest) -> std::result::Result<(), String> {
        if let NodeData::Condition(data) = &req.node.data {
            if data.condition_type == ConditionType::Custom && data.expression.is_none() {
                return Err("custom condition requires an expression".to_string());
            }
        }
        Ok(())
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, Condition);
        let verdict = match data.condition_type {
            ConditionType::Custom => {
                let expression = data.expression.as_deref().unwrap_or("false");
                let scope = Self::expression_scope(req, &inputs);
                expr::evaluate(expression, &scope)?
            }
            ConditionType::DetectMaxIterations => Self::detect_max_iterations(req),
            ConditionType::CheckNodesExecuted => {
                Self::check_nodes_executed(req, &data.node_indices)
            }
            ConditionType::LlmDecision => Self::llm_decision(req, &inputs).await?,
        };

        tracing::debug!(node = %req.node.id, verdict, "condition evaluated");
        // Pass the judged value through to the selected branch.
        let value = match inputs {
            Value::Object(map) if map.len() == 1 => map.into_iter().next().unwrap().1,
            other => other,
        };
        Ok(json!({"result": verdict, "value": value}))
    }

    fn serialize_output(&self, result: Value, req: &ExecutionRequest) -> Result<Envelope> {
        let verdict = result
            .get("result")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let value = result.get("value").cloned().unwrap_or(Value::Null);
        let label = if verdict { "condtrue" } else { "condfalse" };

        let envelope = match value {
            Value::String(s) => {
                Envelope::text(s, req.node.id.clone(), req.execution_id.clone())
            }
            other => Envelope::json(other, req.node.id.clone(), req.execution_id.clone()),
        };
        Ok(envelope
            .with_meta(meta_keys::OUTPUT_LABEL, json!(label))
            .with_meta("branch", json!(verdict)))
    }
}
