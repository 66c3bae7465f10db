//! The per-execution driving loop.
//!
//! One logical task per execution: compute the ready set, dispatch
//! handlers to a semaphore-bounded pool, fold completions back into the
//! scheduler, and stop when the graph quiesces, a failure is fatal, the
//! global iteration bound trips, the wall clock runs out, or the
//! execution is aborted. All state writes go through the state service;
//! every transition is published on the event bus.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::handler::run_lifecycle;
use crate::request::{ExecutionRequest, Inputs};
use crate::runtime::{ExecutionControls, Runtime};
use crate::scheduler::{Decision, Scheduler};
use dipeo_compiler::{ExecutableDiagram, ExecutableEdge};
use dipeo_domain::{
    meta_keys, payloads, DiagramId, Envelope, EnvelopeContentType, EventType, ExecutionEvent,
    ExecutionId, ExecutionState, NodeId, Status, TokenUsage,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// How often the loop re-checks wall-clock limits while waiting on
/// handlers.
const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub execution_id: Option<ExecutionId>,
    pub diagram_id: Option<DiagramId>,
    pub variables: BTreeMap<String, Value>,
    /// Per-execution wall-clock limit; `None` falls back to the engine
    /// config.
    pub timeout: Option<Duration>,
    pub is_sub_diagram: bool,
    /// Externally supplied cancellation (parent execution, CLI Ctrl-C).
    pub cancel: Option<CancelToken>,
}

pub struct Engine {
    runtime: Arc<Runtime>,
}

struct NodeOutcome {
    node_id: NodeId,
    result: Result<Envelope>,
}

impl Engine {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Run a compiled diagram to a terminal state and return the final
    /// execution record.
    pub async fn execute(
        &self,
        diagram: Arc<ExecutableDiagram>,
        options: ExecuteOptions,
    ) -> Result<ExecutionState> {
        let execution_id = options
            .execution_id
            .clone()
            .unwrap_or_else(ExecutionId::generate);
        let cancel = options.cancel.clone().unwrap_or_default();
        let controls = self
            .runtime
            .register_execution(execution_id.clone(), cancel.clone());

        let state = &self.runtime.state;
        state
            .start_execution(
                execution_id.clone(),
                options.diagram_id.clone(),
                options.variables.clone(),
            )
            .await?;
        state
            .seed_node_states(
                &execution_id,
                diagram.nodes.iter().map(|n| n.id.clone()).collect(),
            )
            .await?;
        self.publish(
            EventType::ExecutionStarted,
            &execution_id,
            payloads::execution_status(Status::Running, None),
        );
        tracing::info!(execution_id = %execution_id, nodes = diagram.nodes.len(), "execution started");

        let outcome = self
            .drive(diagram.clone(), &execution_id, &options, &cancel, &controls)
            .await;
        let (status, error) = match outcome {
            Ok((status, error)) => (status, error),
            Err(e) => (Status::Failed, Some(e.to_string())),
        };

        let final_state = state
            .finish_execution(&execution_id, status, error.clone())
            .await?;
        let terminal_event = match status {
            Status::Aborted => EventType::ExecutionAborted,
            Status::Failed => EventType::ExecutionFailed,
            _ => EventType::ExecutionCompleted,
        };
        self.publish(
            terminal_event,
            &execution_id,
            payloads::execution_status(status, error.as_deref()),
        );
        tracing::info!(execution_id = %execution_id, status = %status, "execution finished");

        self.runtime.unregister_execution(&execution_id);
        Ok(final_state)
    }

    async fn drive(
        &self,
        diagram: Arc<ExecutableDiagram>,
        execution_id: &ExecutionId,
        options: &ExecuteOptions,
        cancel: &CancelToken,
        controls: &ExecutionControls,
    ) -> Result<(Status, Option<String>)> {
        let mut scheduler = Scheduler::new(diagram.clone());
        let mut outputs: BTreeMap<NodeId, Envelope> = BTreeMap::new();
        let mut join_set: JoinSet<NodeOutcome> = JoinSet::new();
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.runtime.config.max_concurrent,
        ));

        let timeout = options.timeout.or(self.runtime.config.execution_timeout);
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut rounds: u64 = 0;
        let mut was_paused = false;

        loop {
            if cancel.is_cancelled() {
                self.abort_in_flight(&mut join_set, &mut scheduler, execution_id, "cancelled")
                    .await?;
                return Ok((Status::Aborted, None));
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.abort_in_flight(&mut join_set, &mut scheduler, execution_id, "timeout")
                        .await?;
                    return Ok((
                        Status::Failed,
                        Some(format!("execution timed out after {:?}", timeout.unwrap())),
                    ));
                }
            }

            // Control plane: honor skip requests, then the pause gate.
            for node_id in controls.take_skip_requests() {
                if scheduler.status(&node_id) == Status::Pending {
                    scheduler.record_skipped(&node_id);
                    self.runtime
                        .state
                        .update_node_status(execution_id, &node_id, Status::Skipped, None)
                        .await?;
                    self.publish(
                        EventType::NodeSkipped,
                        execution_id,
                        payloads::node_status(&node_id, Status::Skipped, None, 0),
                    );
                }
            }
            let paused = controls.is_paused();
            if paused != was_paused {
                was_paused = paused;
                let status = if paused { Status::Paused } else { Status::Running };
                self.runtime
                    .state
                    .update_status(execution_id, status, None)
                    .await?;
                self.publish(
                    EventType::ExecutionUpdated,
                    execution_id,
                    payloads::execution_status(status, None),
                );
            }

            let decisions = if paused {
                Vec::new()
            } else {
                scheduler.poll()
            };
            if !decisions.is_empty() {
                rounds += 1;
                if rounds > self.runtime.config.max_iterations {
                    self.abort_in_flight(
                        &mut join_set,
                        &mut scheduler,
                        execution_id,
                        "max_iterations",
                    )
                    .await?;
                    return Ok((Status::MaxiterReached, None));
                }
            }

            for decision in decisions {
                match decision {
                    Decision::MaxIterations(node_id) => {
                        scheduler.record_max_iterations(&node_id);
                        self.runtime
                            .state
                            .update_node_status(
                                execution_id,
                                &node_id,
                                Status::MaxiterReached,
                                None,
                            )
                            .await?;
                        self.publish(
                            EventType::NodeSkipped,
                            execution_id,
                            payloads::node_status(
                                &node_id,
                                Status::MaxiterReached,
                                None,
                                scheduler.exec_count(&node_id),
                            ),
                        );
                    }
                    Decision::Run(node_id) => {
                        let inputs = collect_inputs(&scheduler, &node_id, &outputs);
                        scheduler.mark_dispatched(&node_id);
                        self.runtime
                            .state
                            .update_node_status(execution_id, &node_id, Status::Running, None)
                            .await?;
                        self.publish(
                            EventType::NodeStarted,
                            execution_id,
                            payloads::node_status(
                                &node_id,
                                Status::Running,
                                None,
                                scheduler.exec_count(&node_id),
                            ),
                        );

                        let request = ExecutionRequest {
                            node: diagram
                                .get_node(&node_id)
                                .expect("scheduler only yields known nodes")
                                .clone(),
                            diagram: diagram.clone(),
                            services: self.runtime.services.clone(),
                            execution_id: execution_id.clone(),
                            cancel: cancel.clone(),
                            variables: options.variables.clone(),
                            exec_counts: scheduler.exec_counts(),
                            iteration: scheduler.exec_count(&node_id),
                            is_sub_diagram: options.is_sub_diagram,
                        };
                        let handlers = self.runtime.handlers.clone();
                        let permit_semaphore = semaphore.clone();
                        join_set.spawn(async move {
                            // The semaphore is never closed; Err is unreachable.
                            let _permit = permit_semaphore.acquire_owned().await.ok();
                            let result = match handlers.get(request.node.node_type()) {
                                Ok(handler) => {
                                    run_lifecycle(handler.as_ref(), &request, &inputs).await
                                }
                                Err(e) => Err(e),
                            };
                            NodeOutcome {
                                node_id: request.node.id.clone(),
                                result,
                            }
                        });
                    }
                }
            }

            if join_set.is_empty() {
                if paused {
                    tokio::time::sleep(TICK).await;
                    continue;
                }
                if scheduler.poll().is_empty() {
                    return Ok((Status::Completed, None));
                }
                // New decisions appeared after processing; loop again.
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => continue,
                _ = tokio::time::sleep(TICK) => continue,
                joined = join_set.join_next() => {
                    let Some(joined) = joined else { continue };
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(join_error) => {
                            // A panicking handler fails its execution.
                            return Ok((
                                Status::Failed,
                                Some(format!("handler task failed: {join_error}")),
                            ));
                        }
                    };
                    if let Some(fatal) = self
                        .fold_outcome(outcome, &mut scheduler, &mut outputs, execution_id)
                        .await?
                    {
                        // A handler observing the abort signal fails with
                        // kind=cancelled; that is an abort, not a failure.
                        if cancel.is_cancelled() {
                            self.abort_in_flight(&mut join_set, &mut scheduler, execution_id, "cancelled")
                                .await?;
                            return Ok((Status::Aborted, None));
                        }
                        self.abort_in_flight(&mut join_set, &mut scheduler, execution_id, "failed")
                            .await?;
                        return Ok((Status::Failed, Some(fatal)));
                    }
                }
            }
        }
    }

    /// Fold one handler completion into scheduler and state. Returns the
    /// fatal error message when the failure must end the execution.
    async fn fold_outcome(
        &self,
        outcome: NodeOutcome,
        scheduler: &mut Scheduler,
        outputs: &mut BTreeMap<NodeId, Envelope>,
        execution_id: &ExecutionId,
    ) -> Result<Option<String>> {
        let node_id = outcome.node_id;
        match outcome.result {
            Ok(envelope) if !envelope.is_error() => {
                let label = envelope.output_label().to_string();
                let tokens = token_usage_from_meta(&envelope);
                scheduler.record_completion(&node_id, &label);
                outputs.insert(node_id.clone(), envelope.clone());

                self.runtime
                    .state
                    .update_node_execution(
                        execution_id,
                        &node_id,
                        envelope.clone(),
                        Status::Completed,
                        tokens,
                        None,
                    )
                    .await?;
                self.publish(
                    EventType::NodeCompleted,
                    execution_id,
                    payloads::node_status(
                        &node_id,
                        Status::Completed,
                        None,
                        scheduler.exec_count(&node_id),
                    ),
                );
                Ok(None)
            }
            Ok(error_envelope) => {
                let (message, kind) = {
                    let (m, k) = error_envelope.as_error().unwrap_or(("error envelope", "unknown"));
                    (m.to_string(), k.to_string())
                };
                self.fold_failure(&node_id, error_envelope, message, &kind, scheduler, outputs, execution_id)
                    .await
            }
            Err(e) => {
                let kind = e.kind().to_string();
                let message = e.to_string();
                let error_envelope = Envelope::error(
                    message.clone(),
                    kind.clone(),
                    node_id.clone(),
                    execution_id.clone(),
                );
                self.fold_failure(&node_id, error_envelope, message, &kind, scheduler, outputs, execution_id)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fold_failure(
        &self,
        node_id: &NodeId,
        error_envelope: Envelope,
        message: String,
        kind: &str,
        scheduler: &mut Scheduler,
        outputs: &mut BTreeMap<NodeId, Envelope>,
        execution_id: &ExecutionId,
    ) -> Result<Option<String>> {
        tracing::warn!(execution_id = %execution_id, node = %node_id, kind, error = %message, "node failed");
        scheduler.record_failure(node_id);
        outputs.insert(node_id.clone(), error_envelope.clone());

        self.runtime
            .state
            .update_node_execution(
                execution_id,
                node_id,
                error_envelope,
                Status::Failed,
                None,
                Some(message.clone()),
            )
            .await?;
        self.publish(
            EventType::NodeFailed,
            execution_id,
            payloads::node_status(
                node_id,
                Status::Failed,
                Some(&message),
                scheduler.exec_count(node_id),
            ),
        );

        if scheduler.failure_is_fatal(node_id) {
            Ok(Some(message))
        } else {
            Ok(None)
        }
    }

    /// Abort everything still running and record why.
    async fn abort_in_flight(
        &self,
        join_set: &mut JoinSet<NodeOutcome>,
        scheduler: &mut Scheduler,
        execution_id: &ExecutionId,
        kind: &'static str,
    ) -> Result<()> {
        join_set.shutdown().await;
        for node_id in scheduler.drain_running() {
            let message = format!("node stopped: {kind}");
            self.runtime
                .state
                .update_node_execution(
                    execution_id,
                    &node_id,
                    Envelope::error(
                        message.clone(),
                        kind,
                        node_id.clone(),
                        execution_id.clone(),
                    ),
                    Status::Failed,
                    None,
                    Some(message.clone()),
                )
                .await?;
            self.publish(
                EventType::NodeFailed,
                execution_id,
                payloads::node_status(
                    &node_id,
                    Status::Failed,
                    Some(&message),
                    scheduler.exec_count(&node_id),
                ),
            );
        }
        Ok(())
    }

    fn publish(&self, event_type: EventType, execution_id: &ExecutionId, payload: Value) {
        self.runtime.bus.publish(ExecutionEvent::new(
            event_type,
            execution_id.clone(),
            payload,
        ));
    }
}

/// Key an edge's value lands under in the target's inputs.
fn input_key(edge: &ExecutableEdge) -> String {
    if let Some(variable) = &edge.transform_rules.variable_name {
        return variable.clone();
    }
    if let Some(label) = edge.metadata.get("label").and_then(Value::as_str) {
        return label.to_string();
    }
    edge.target_input_label.as_str().to_string()
}

/// Apply an edge's transform rules to the envelope it carries.
fn apply_transforms(edge: &ExecutableEdge, envelope: &Envelope) -> Envelope {
    let mut out = envelope.clone();

    if edge.transform_rules.parse_json {
        if let Ok(text) = out.as_text() {
            if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                let meta = out.meta.clone();
                out = Envelope::json(parsed, out.produced_by.clone(), out.trace_id.clone());
                out.meta = meta;
            }
        }
    }
    if edge.transform_rules.pass_conversation
        && out.content_type != EnvelopeContentType::ConversationState
    {
        if let Ok(text) = out.as_text() {
            let turns = json!([{"role": "assistant", "content": text}]);
            let meta = out.meta.clone();
            out = Envelope::conversation(turns, out.produced_by.clone(), out.trace_id.clone());
            out.meta = meta;
        }
    }
    out
}

/// Gather a node's inputs from its contributing, delivered edges.
fn collect_inputs(
    scheduler: &Scheduler,
    node_id: &NodeId,
    outputs: &BTreeMap<NodeId, Envelope>,
) -> Inputs {
    let mut inputs = Inputs::new();
    for edge in scheduler.input_edges(node_id) {
        let Some(envelope) = outputs.get(&edge.source_node) else {
            continue;
        };
        inputs.insert(input_key(edge), apply_transforms(edge, envelope));
    }
    inputs
}

/// Token usage a handler reported through its envelope meta.
fn token_usage_from_meta(envelope: &Envelope) -> Option<TokenUsage> {
    let get = |key: &str| {
        envelope
            .meta
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    let usage = TokenUsage::new(
        get(meta_keys::INPUT_TOKENS),
        get(meta_keys::OUTPUT_TOKENS),
        get(meta_keys::CACHED_TOKENS),
    );
    if usage.is_zero() {
        None
    } else {
        Some(usage)
    }
}
