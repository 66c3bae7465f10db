//! # dipeo-domain - DiPeO domain model
//!
//! Pure data types shared by every other crate in the workspace: branded
//! identifiers, the handle ID algebra, the diagram model, the typed
//! node-data catalog, the envelope value type, execution state, and domain
//! events. Nothing here does I/O.

pub mod diagram;
pub mod enums;
pub mod envelope;
pub mod error;
pub mod events;
pub mod execution;
pub mod handles;
pub mod ids;
pub mod node_data;

pub use diagram::{
    DiagramMetadata, DomainArrow, DomainDiagram, DomainHandle, DomainNode, DomainPerson,
    PersonLlmConfig, Position,
};
pub use enums::{ArrowContentType, DataType, HandleDirection, HandleLabel, NodeType, Status};
pub use envelope::{meta_keys, Envelope, EnvelopeBody, EnvelopeContentType};
pub use error::{DomainError, Result};
pub use events::{payloads, EventType, ExecutionEvent};
pub use execution::{ExecutionState, NodeState, TokenUsage};
pub use handles::{
    create_handle_id, extract_node_id, handle_specs, is_valid_handle_id, parse_handle_id,
    validate_bracket_syntax, HandleSpec, ParsedHandle,
};
pub use ids::{ApiKeyId, ArrowId, DiagramId, ExecutionId, HandleId, NodeId, PersonId};
pub use node_data::{
    ApiJobData, AuthType, CodeJobData, CodeLanguage, ConditionData, ConditionType, DbData,
    DbOperation, DiffPatchData, EndpointData, HookData, HookType, HttpMethod, IntegratedApiData,
    IrBuilderData, JsonSchemaValidatorData, NodeData, PersonJobData, StartData, SubDiagramData,
    TemplateJobData, TypescriptAstData, UserResponseData,
};
