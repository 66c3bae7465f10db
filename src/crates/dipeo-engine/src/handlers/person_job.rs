//! `person_job` handler: one LLM turn for a configured person.
//!
//! The `first` input and `first_only_prompt` apply on the node's first run
//! only; later iterations use the default prompt. Prompts render through
//! minijinja with execution variables and decoded inputs in scope.
//! Conversation-state inputs are prepended to the outgoing message list.
//! Batch mode fans the prompt over an input array, optionally in
//! parallel, and partial failures surface as per-item error entries.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::keys::LLM_SERVICE;
use crate::ports::{ChatMessage, LlmRequest, LlmService};
use crate::request::{ExecutionRequest, Inputs};
use async_trait::async_trait;
use dipeo_domain::{
    meta_keys, DomainPerson, Envelope, EnvelopeContentType, NodeData, NodeType, PersonJobData,
};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;

/// Key conversation-state inputs travel under in the prepared dict.
const CONVERSATION_KEY: &str = "_conversation";

/// Batch fan-out width.
const BATCH_CONCURRENCY: usize = 8;

pub struct PersonJobHandler;

impl PersonJobHandler {
    fn person_for<'r>(req: &'r ExecutionRequest, data: &PersonJobData) -> Result<&'r DomainPerson> {
        data.person
            .as_ref()
            .and_then(|id| req.person(id))
            .ok_or_else(|| {
                EngineError::node_execution(
                    req.node.id.clone(),
                    "person_job requires a resolvable person",
                    "validation",
                )
            })
    }

    /// First run prefers the first-only prompt; later runs use the default.
    fn select_prompt(data: &PersonJobData, iteration: u32) -> Option<String> {
        if iteration == 0 {
            if let Some(first) = data
                .first_only_prompt
                .clone()
                .or_else(|| data.resolved_first_prompt.clone())
            {
                return Some(first);
            }
        }
        data.default_prompt
            .clone()
            .or_else(|| data.resolved_prompt.clone())
    }

    fn render(template: &str, scope: &Value) -> Result<String> {
        let mut env = minijinja::Environment::new();
        env.add_template("prompt", template)?;
        Ok(env.get_template("prompt")?.render(scope)?)
    }

    fn build_messages(
        person: &DomainPerson,
        prompt: String,
        conversation: Option<&Value>,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(system) = &person.llm_config.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        if let Some(Value::Array(turns)) = conversation {
            for turn in turns {
                let role = turn.get("role").and_then(Value::as_str).unwrap_or("user");
                let content = turn.get("content").and_then(Value::as_str).unwrap_or("");
                messages.push(ChatMessage {
                    role: role.to_string(),
                    content: content.to_string(),
                });
            }
        }
        messages.push(ChatMessage::user(prompt));
        messages
    }

    async fn complete_once(
        llm: &Arc<dyn LlmService>,
        person: &DomainPerson,
        prompt: String,
        conversation: Option<&Value>,
    ) -> Result<Value> {
        let response = llm
            .complete(LlmRequest {
                service: person.llm_config.service.clone(),
                model: person.llm_config.model.clone(),
                api_key_id: person.llm_config.api_key_id.clone(),
                messages: Self::build_messages(person, prompt, conversation),
            })
            .await?;
        Ok(json!({
            "text": response.text,
            "model": response.model,
            "token_usage": response.token_usage,
        }))
    }

    async fn run_batch(
        &self,
        data: &PersonJobData,
        inputs: &Value,
        req: &ExecutionRequest,
    ) -> Result<Value> {
        let llm = req.services.resolve(LLM_SERVICE)?;
        let person = Self::person_for(req, data)?;
        let template = Self::select_prompt(data, req.iteration).unwrap_or_default();

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
                let llm = llm.clone();
                let person = person.clone();
                let template = template.clone();
                let base_scope = req.template_scope(inputs);
                async move {
                    let mut scope = base_scope;
                    if let Value::Object(map) = &mut scope {
                        map.insert("item".to_string(), item.clone());
                        map.insert("index".to_string(), json!(index));
                    }
                    let rendered = match Self::render(&template, &scope) {
                        Ok(p) => p,
                        Err(e) => {
                            return json!({"error": e.to_string(), "index": index});
                        }
                    };
                    match Self::complete_once(&llm, &person, rendered, None).await {
                        Ok(mut result) => {
                            result["index"] = json!(index);
                            result
                        }
                        // Item failures stay in the array; the batch goes on.
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
        Ok(json!({"results": results, "batch": true}))
    }
}

#[async_trait]
impl NodeHandler for PersonJobHandler {
    fn node_type(&self) -> NodeType {
        NodeType::PersonJob
    }

    fn validate(&self, req: &ExecutionRequest) -> std::result::Result<(), String> {
        if let NodeData::PersonJob(data) = &req.node.data {
            if data.person.is_none() {
                return Err("person_job requires a person".to_string());
            }
            if Self::select_prompt(data, 0).is_none() {
                return Err("person_job requires a prompt".to_string());
            }
        }
        Ok(())
    }

    fn prepare_inputs(&self, req: &ExecutionRequest, inputs: &Inputs) -> Result<Value> {
        let mut map = serde_json::Map::new();
        let mut conversation: Option<Value> = None;

        for (key, envelope) in inputs {
            // The `first` input only participates on the first run.
            if key == "first" && req.iteration > 0 {
                continue;
            }
            if envelope.content_type == EnvelopeContentType::ConversationState {
                conversation = Some(envelope.body_value());
                continue;
            }
            map.insert(key.clone(), envelope.body_value());
        }
        if let Some(conversation) = conversation {
            map.insert(CONVERSATION_KEY.to_string(), conversation);
        }
        Ok(Value::Object(map))
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, PersonJob);
        if data.batch {
            return self.run_batch(data, &inputs, req).await;
        }

        let llm = req.services.resolve(LLM_SERVICE)?;
        let person = Self::person_for(req, data)?;
        let template = Self::select_prompt(data, req.iteration).ok_or_else(|| {
            EngineError::node_execution(req.node.id.clone(), "no prompt configured", "validation")
        })?;

        let scope = req.template_scope(&inputs);
        let prompt = Self::render(&template, &scope)?;
        let conversation = inputs.get(CONVERSATION_KEY);

        req.cancel
            .guard(Self::complete_once(&llm, person, prompt, conversation))
            .await
            .ok_or_else(|| {
                EngineError::node_execution(req.node.id.clone(), "cancelled", "cancelled")
            })?
    }

    fn serialize_output(&self, result: Value, req: &ExecutionRequest) -> Result<Envelope> {
        if result.get("batch").and_then(Value::as_bool).unwrap_or(false) {
            let results = result.get("results").cloned().unwrap_or(json!([]));
            return Ok(Envelope::json(
                results,
                req.node.id.clone(),
                req.execution_id.clone(),
            ));
        }

        let text = result
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut envelope =
            Envelope::text(text, req.node.id.clone(), req.execution_id.clone());
        if let Some(model) = result.get("model") {
            envelope = envelope.with_meta(meta_keys::MODEL, model.clone());
        }
        if let Some(usage) = result.get("token_usage") {
            envelope = envelope
                .with_meta(
                    meta_keys::INPUT_TOKENS,
                    usage.get("input").cloned().unwrap_or(json!(0)),
                )
                .with_meta(
                    meta_keys::OUTPUT_TOKENS,
                    usage.get("output").cloned().unwrap_or(json!(0)),
                )
                .with_meta(
                    meta_keys::CACHED_TOKENS,
                    usage.get("cached").cloned().unwrap_or(json!(0)),
                );
        }
        envelope = envelope.with_meta(meta_keys::ITERATION, json!(req.iteration));
        Ok(envelope)
    }
}
