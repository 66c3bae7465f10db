//! Runtime wiring.
//!
//! A [`Runtime`] value owns the service registry, event bus, state
//! service, message router, and handler registry. Entry points take the
//! runtime explicitly; tests construct independent runtimes instead of
//! reaching into globals.

use crate::cancel::CancelToken;
use crate::engine::{Engine, ExecuteOptions};
use crate::error::Result;
use crate::handler::HandlerRegistry;
use crate::handlers::register_default_handlers;
use crate::keys;
use crate::ports::local::{LocalFileSystem, RegexAstParser, ReqwestApiInvoker, TokioProcessRunner};
use crate::ports::{ApiInvoker, AstParser, FileSystem, ProcessRunner};
use crate::registry::ServiceRegistry;
use crate::runner::{DiagramRunner, SubDiagramRequest, SubDiagramResult};
use async_trait::async_trait;
use dashmap::DashMap;
use dipeo_compiler::ExecutableDiagram;
use dipeo_domain::{ExecutionId, NodeId};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use dipeo_events::{EventBus, MessageRouter, StateStoreObserver, StreamingObserver};
use dipeo_state::{
    InMemoryStateRepository, LiveExecutionCache, StateRepository, StateService,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Handler parallelism per execution.
    pub max_concurrent: usize,
    /// Global dispatch-round bound before `MAXITER_REACHED`.
    pub max_iterations: u64,
    /// Default per-execution wall-clock limit.
    pub execution_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            max_iterations: 100,
            execution_timeout: None,
        }
    }
}

/// The control plane of one live execution: abort signal, pause gate,
/// and requested node skips. Shared between the driving loop and the
/// runtime's control entry points.
#[derive(Clone, Default)]
pub struct ExecutionControls {
    pub cancel: CancelToken,
    paused: Arc<AtomicBool>,
    skip_requests: Arc<parking_lot::Mutex<BTreeSet<NodeId>>>,
}

impl ExecutionControls {
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            cancel,
            ..Default::default()
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn request_skip(&self, node_id: NodeId) {
        self.skip_requests.lock().insert(node_id);
    }

    /// Drain pending skip requests; each is honored at most once.
    pub fn take_skip_requests(&self) -> Vec<NodeId> {
        let mut requests = self.skip_requests.lock();
        let drained: Vec<NodeId> = requests.iter().cloned().collect();
        requests.clear();
        drained
    }
}

pub struct Runtime {
    pub services: Arc<ServiceRegistry>,
    pub bus: Arc<EventBus>,
    pub state: Arc<StateService>,
    pub router: Arc<MessageRouter>,
    pub handlers: Arc<HandlerRegistry>,
    pub config: EngineConfig,
    /// Control plane per live execution.
    controls: DashMap<ExecutionId, ExecutionControls>,
}

impl Runtime {
    /// Build a runtime over the given durable repository. `bind` runs
    /// last and may override any default service binding (tests bind
    /// mocks here).
    pub fn new(
        config: EngineConfig,
        repo: Arc<dyn StateRepository>,
        bind: impl FnOnce(&mut ServiceRegistry),
    ) -> Arc<Self> {
        let cache = Arc::new(LiveExecutionCache::new(repo.clone()));
        let state = Arc::new(StateService::new(cache, repo.clone()));
        let bus = Arc::new(EventBus::new());
        let router = MessageRouter::new();

        let mut handlers = HandlerRegistry::new();
        register_default_handlers(&mut handlers);
        let handlers = Arc::new(handlers);

        Arc::new_cyclic(|weak: &Weak<Runtime>| {
            let mut services = ServiceRegistry::new();
            services.register(keys::STATE_SERVICE, state.clone());
            services.register(keys::STATE_REPOSITORY, repo.clone());
            services.register(keys::EVENT_BUS, bus.clone());
            services.register(keys::MESSAGE_ROUTER, router.clone());
            services.register(keys::HANDLER_REGISTRY, handlers.clone());
            services.register(
                keys::FILESYSTEM_ADAPTER,
                Arc::new(LocalFileSystem) as Arc<dyn FileSystem>,
            );
            services.register(
                keys::PROCESS_RUNNER,
                Arc::new(TokioProcessRunner) as Arc<dyn ProcessRunner>,
            );
            services.register(
                keys::API_INVOKER,
                Arc::new(ReqwestApiInvoker::new()) as Arc<dyn ApiInvoker>,
            );
            services.register(
                keys::AST_PARSER,
                Arc::new(RegexAstParser) as Arc<dyn AstParser>,
            );
            services.register(
                keys::DIAGRAM_RUNNER,
                Arc::new(EngineRunner {
                    runtime: weak.clone(),
                }) as Arc<dyn DiagramRunner>,
            );
            bind(&mut services);

            Runtime {
                services: Arc::new(services),
                bus,
                state,
                router,
                handlers,
                config,
                controls: DashMap::new(),
            }
        })
    }

    /// All-default in-memory runtime.
    pub fn in_memory(config: EngineConfig) -> Arc<Self> {
        Self::new(config, Arc::new(InMemoryStateRepository::new()), |_| {})
    }

    /// Spawn the standing observers: state materialization from events and
    /// subscription-frame streaming through the router. Call once from an
    /// async context.
    pub fn spawn_observers(&self) {
        let _ = StateStoreObserver::spawn(&self.bus, self.state.clone());
        let _ = StreamingObserver::spawn(&self.bus, self.router.clone());
    }

    pub(crate) fn register_execution(
        &self,
        execution_id: ExecutionId,
        cancel: CancelToken,
    ) -> ExecutionControls {
        let controls = ExecutionControls::with_cancel(cancel);
        self.controls.insert(execution_id, controls.clone());
        controls
    }

    pub(crate) fn unregister_execution(&self, execution_id: &ExecutionId) {
        self.controls.remove(execution_id);
    }

    /// Trip an execution's cancellation signal. Returns false when the
    /// execution is not live (cancel after completion is a no-op).
    pub fn abort_execution(&self, execution_id: &ExecutionId) -> bool {
        match self.controls.get(execution_id) {
            Some(controls) => {
                tracing::info!(execution_id = %execution_id, "abort requested");
                controls.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop dispatching new nodes; in-flight handlers finish normally.
    pub fn pause_execution(&self, execution_id: &ExecutionId) -> bool {
        match self.controls.get(execution_id) {
            Some(controls) => {
                controls.set_paused(true);
                true
            }
            None => false,
        }
    }

    pub fn resume_execution(&self, execution_id: &ExecutionId) -> bool {
        match self.controls.get(execution_id) {
            Some(controls) => {
                controls.set_paused(false);
                true
            }
            None => false,
        }
    }

    /// Ask the driving loop to skip a node that has not started yet.
    pub fn skip_node(&self, execution_id: &ExecutionId, node_id: NodeId) -> bool {
        match self.controls.get(execution_id) {
            Some(controls) => {
                controls.request_skip(node_id);
                true
            }
            None => false,
        }
    }
}

/// The engine exposed behind the recursion seam for `sub_diagram` nodes.
struct EngineRunner {
    runtime: Weak<Runtime>,
}

#[async_trait]
impl DiagramRunner for EngineRunner {
    async fn run_sub_diagram(
        &self,
        diagram: Arc<ExecutableDiagram>,
        request: SubDiagramRequest,
    ) -> Result<SubDiagramResult> {
        let runtime = self.runtime.upgrade().ok_or_else(|| {
            crate::error::EngineError::service("runtime dropped during sub-diagram run", false)
        })?;
        let engine = Engine::new(runtime);
        let child_id = ExecutionId::generate();
        tracing::debug!(
            parent = %request.parent_execution_id,
            child = %child_id,
            isolate_conversation = request.isolate_conversation,
            "starting sub-diagram execution"
        );

        let final_state = engine
            .execute(
                diagram.clone(),
                ExecuteOptions {
                    execution_id: Some(child_id.clone()),
                    diagram_id: diagram.metadata.id.clone(),
                    variables: request.variables,
                    timeout: None,
                    is_sub_diagram: true,
                    cancel: Some(request.cancel),
                },
            )
            .await?;

        // Terminal node outputs keyed by label form the child's result.
        let mut outputs = BTreeMap::new();
        for node in diagram.terminal_nodes() {
            if let Some(envelope) = final_state.node_outputs.get(&node.id) {
                outputs.insert(node.label.clone(), envelope.body_value());
            }
        }
        Ok(SubDiagramResult {
            execution_id: child_id,
            status: final_state.status,
            outputs,
            error: final_state.error,
        })
    }
}
