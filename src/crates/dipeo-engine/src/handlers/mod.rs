//! Node handlers, one per node type.

mod api_job;
mod code_job;
mod condition;
mod db;
mod diff_patch;
mod endpoint;
mod hook;
mod integrated_api;
mod ir_builder;
mod json_schema_validator;
mod person_job;
mod start;
mod sub_diagram;
mod template_job;
mod typescript_ast;
mod user_response;

pub use api_job::ApiJobHandler;
pub use code_job::CodeJobHandler;
pub use condition::ConditionHandler;
pub use db::DbHandler;
pub use diff_patch::DiffPatchHandler;
pub use endpoint::EndpointHandler;
pub use hook::HookHandler;
pub use integrated_api::IntegratedApiHandler;
pub use ir_builder::IrBuilderHandler;
pub use json_schema_validator::JsonSchemaValidatorHandler;
pub use person_job::PersonJobHandler;
pub use start::StartHandler;
pub use sub_diagram::SubDiagramHandler;
pub use template_job::TemplateJobHandler;
pub use typescript_ast::TypescriptAstHandler;
pub use user_response::UserResponseHandler;

use crate::handler::HandlerRegistry;
use std::sync::Arc;

/// Register every built-in handler.
pub fn register_default_handlers(registry: &mut HandlerRegistry) {
    registry.register(Arc::new(StartHandler));
    registry.register(Arc::new(EndpointHandler));
    registry.register(Arc::new(PersonJobHandler));
    registry.register(Arc::new(ConditionHandler));
    registry.register(Arc::new(CodeJobHandler));
    registry.register(Arc::new(ApiJobHandler));
    registry.register(Arc::new(DbHandler));
    registry.register(Arc::new(SubDiagramHandler));
    registry.register(Arc::new(TemplateJobHandler));
    registry.register(Arc::new(JsonSchemaValidatorHandler));
    registry.register(Arc::new(HookHandler));
    registry.register(Arc::new(UserResponseHandler));
    registry.register(Arc::new(TypescriptAstHandler));
    registry.register(Arc::new(IntegratedApiHandler));
    registry.register(Arc::new(IrBuilderHandler));
    registry.register(Arc::new(DiffPatchHandler));
}

/// Fetch the typed payload for a handler or fail the node. Handlers only
/// ever see nodes of their own type; a mismatch is an engine bug surfaced
/// loudly rather than a panic.
macro_rules! expect_data {
    ($req:expr, $variant:ident) => {
        match &$req.node.data {
            dipeo_domain::NodeData::$variant(data) => data,
            _ => {
                return Err(crate::error::EngineError::node_execution(
                    $req.node.id.clone(),
                    format!(
                        "handler for '{}' received node of type '{}'",
                        stringify!($variant),
                        $req.node.node_type()
                    ),
                    "validation",
                ))
            }
        }
    };
}
pub(crate) use expect_data;
