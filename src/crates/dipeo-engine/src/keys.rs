//! Well-known service registry keys.
//!
//! The first block is what the core requires to run at all; the second
//! gates feature handlers, which fail their nodes with `MissingService`
//! when resolved against a registry that does not bind them.

use crate::handler::HandlerRegistry;
use crate::ports::{ApiInvoker, AstParser, FileSystem, LlmService, ProcessRunner};
use crate::registry::ServiceKey;
use crate::runner::DiagramRunner;
use dipeo_events::{EventBus, MessageRouter};
use dipeo_state::{StateRepository, StateService};
use std::sync::Arc;

pub const STATE_SERVICE: ServiceKey<Arc<StateService>> = ServiceKey::new("state_service");
pub const STATE_REPOSITORY: ServiceKey<Arc<dyn StateRepository>> =
    ServiceKey::new("state_repository");
pub const EVENT_BUS: ServiceKey<Arc<EventBus>> = ServiceKey::new("event_bus");
pub const MESSAGE_ROUTER: ServiceKey<Arc<MessageRouter>> = ServiceKey::new("message_router");
pub const HANDLER_REGISTRY: ServiceKey<Arc<HandlerRegistry>> =
    ServiceKey::new("handler_registry");
pub const FILESYSTEM_ADAPTER: ServiceKey<Arc<dyn FileSystem>> =
    ServiceKey::new("filesystem_adapter");

pub const LLM_SERVICE: ServiceKey<Arc<dyn LlmService>> = ServiceKey::new("llm_service");
pub const API_INVOKER: ServiceKey<Arc<dyn ApiInvoker>> = ServiceKey::new("api_invoker");
pub const PROCESS_RUNNER: ServiceKey<Arc<dyn ProcessRunner>> = ServiceKey::new("process_runner");
pub const AST_PARSER: ServiceKey<Arc<dyn AstParser>> = ServiceKey::new("ast_parser");
pub const DIAGRAM_RUNNER: ServiceKey<Arc<dyn DiagramRunner>> = ServiceKey::new("diagram_runner");
