//! Typed node payloads: the node-data catalog.
//!
//! The domain diagram keeps node payloads as open maps; compilation parses
//! them into the structs here. The executable on-disk format reconstructs
//! typed nodes from `{type, data}` pairs through [`NodeData::parse`], so
//! this table is the single source of truth for what each node type
//! accepts.

use crate::enums::NodeType;
use crate::error::{DomainError, Result};
use crate::ids::PersonId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn default_max_iteration() -> u32 {
    1
}

fn default_batch_input_key() -> String {
    "items".to_string()
}

fn default_user_response_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StartData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom_data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EndpointData {
    #[serde(default)]
    pub save_to_file: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonJobData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person: Option<PersonId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_only_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_prompt: Option<String>,
    /// Path to a prompt file, resolved relative to the diagram file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<String>,
    /// Inlined content of `prompt_file`, filled by prompt pre-compilation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_first_prompt: Option<String>,
    #[serde(default = "default_max_iteration")]
    pub max_iteration: u32,
    #[serde(default)]
    pub batch: bool,
    #[serde(default = "default_batch_input_key")]
    pub batch_input_key: String,
    #[serde(default)]
    pub batch_parallel: bool,
}

impl Default for PersonJobData {
    fn default() -> Self {
        Self {
            person: None,
            first_only_prompt: None,
            default_prompt: None,
            prompt_file: None,
            resolved_prompt: None,
            resolved_first_prompt: None,
            max_iteration: 1,
            batch: false,
            batch_input_key: default_batch_input_key(),
            batch_parallel: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    #[default]
    Custom,
    DetectMaxIterations,
    CheckNodesExecuted,
    LlmDecision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConditionData {
    #[serde(default)]
    pub condition_type: ConditionType,
    /// Boolean expression over execution variables (`custom`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Node labels checked by `check_nodes_executed`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_indices: Vec<String>,
    /// Person asked by `llm_decision`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person: Option<PersonId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CodeLanguage {
    #[default]
    Python,
    Typescript,
    Bash,
    Shell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CodeJobData {
    #[serde(default)]
    pub language: CodeLanguage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    /// Seconds; unset means no per-node limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    Bearer,
    Basic,
    ApiKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ApiJobData {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub auth_type: AuthType,
    /// Reference into the API-key store, not a literal secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DbOperation {
    #[default]
    Read,
    Write,
    Append,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DbData {
    /// File path or list of file paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<Value>,
    #[serde(default)]
    pub operation: DbOperation,
    #[serde(default)]
    pub serialize_json: bool,
    /// Treat `file` entries as glob patterns on read.
    #[serde(default)]
    pub glob: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubDiagramData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagram_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagram_format: Option<String>,
    /// Inline child diagram, used instead of `diagram_name` when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagram_data: Option<Value>,
    /// Parent input label -> child variable name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_mapping: BTreeMap<String, String>,
    /// Child output key -> parent output key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub batch: bool,
    #[serde(default = "default_batch_input_key")]
    pub batch_input_key: String,
    #[serde(default)]
    pub batch_parallel: bool,
    #[serde(default)]
    pub isolate_conversation: bool,
    /// Make this node a no-op when the surrounding execution is itself a
    /// sub-diagram.
    #[serde(default)]
    pub ignore_if_sub: bool,
}

impl Default for SubDiagramData {
    fn default() -> Self {
        Self {
            diagram_name: None,
            diagram_format: None,
            diagram_data: None,
            input_mapping: BTreeMap::new(),
            output_mapping: BTreeMap::new(),
            batch: false,
            batch_input_key: default_batch_input_key(),
            batch_parallel: false,
            isolate_conversation: false,
            ignore_if_sub: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TemplateJobData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JsonSchemaValidatorData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
    #[serde(default)]
    pub strict_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    #[default]
    Shell,
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HookData {
    #[serde(default)]
    pub hook_type: HookType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponseData {
    pub prompt: String,
    #[serde(default = "default_user_response_timeout")]
    pub timeout: u64,
}

impl Default for UserResponseData {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            timeout: default_user_response_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TypescriptAstData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extract_patterns: Vec<String>,
    #[serde(default)]
    pub include_jsdoc: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IntegratedApiData {
    pub provider: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IrBuilderData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builder_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DiffPatchData {
    pub target_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default)]
    pub backup: bool,
    #[serde(default)]
    pub dry_run: bool,
}

/// Typed node payload, one variant per node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NodeData {
    Start(StartData),
    Endpoint(EndpointData),
    PersonJob(PersonJobData),
    Condition(ConditionData),
    CodeJob(CodeJobData),
    ApiJob(ApiJobData),
    Db(DbData),
    SubDiagram(SubDiagramData),
    TemplateJob(TemplateJobData),
    JsonSchemaValidator(JsonSchemaValidatorData),
    Hook(HookData),
    UserResponse(UserResponseData),
    TypescriptAst(TypescriptAstData),
    IntegratedApi(IntegratedApiData),
    IrBuilder(IrBuilderData),
    DiffPatch(DiffPatchData),
}

impl NodeData {
    /// Parse a raw payload map for the given node type. Unknown keys
    /// (`label`, positions, UI leftovers) are ignored.
    pub fn parse(node_type: NodeType, raw: &Map<String, Value>) -> Result<Self> {
        let value = Value::Object(raw.clone());
        let parsed = match node_type {
            NodeType::Start => NodeData::Start(from_value(value)?),
            NodeType::Endpoint => NodeData::Endpoint(from_value(value)?),
            NodeType::PersonJob => NodeData::PersonJob(from_value(value)?),
            NodeType::Condition => NodeData::Condition(from_value(value)?),
            NodeType::CodeJob => NodeData::CodeJob(from_value(value)?),
            NodeType::ApiJob => NodeData::ApiJob(from_value(value)?),
            NodeType::Db => NodeData::Db(from_value(value)?),
            NodeType::SubDiagram => NodeData::SubDiagram(from_value(value)?),
            NodeType::TemplateJob => NodeData::TemplateJob(from_value(value)?),
            NodeType::JsonSchemaValidator => NodeData::JsonSchemaValidator(from_value(value)?),
            NodeType::Hook => NodeData::Hook(from_value(value)?),
            NodeType::UserResponse => NodeData::UserResponse(from_value(value)?),
            NodeType::TypescriptAst => NodeData::TypescriptAst(from_value(value)?),
            NodeType::IntegratedApi => NodeData::IntegratedApi(from_value(value)?),
            NodeType::IrBuilder => NodeData::IrBuilder(from_value(value)?),
            NodeType::DiffPatch => NodeData::DiffPatch(from_value(value)?),
        };
        Ok(parsed)
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeData::Start(_) => NodeType::Start,
            NodeData::Endpoint(_) => NodeType::Endpoint,
            NodeData::PersonJob(_) => NodeType::PersonJob,
            NodeData::Condition(_) => NodeType::Condition,
            NodeData::CodeJob(_) => NodeType::CodeJob,
            NodeData::ApiJob(_) => NodeType::ApiJob,
            NodeData::Db(_) => NodeType::Db,
            NodeData::SubDiagram(_) => NodeType::SubDiagram,
            NodeData::TemplateJob(_) => NodeType::TemplateJob,
            NodeData::JsonSchemaValidator(_) => NodeType::JsonSchemaValidator,
            NodeData::Hook(_) => NodeType::Hook,
            NodeData::UserResponse(_) => NodeType::UserResponse,
            NodeData::TypescriptAst(_) => NodeType::TypescriptAst,
            NodeData::IntegratedApi(_) => NodeType::IntegratedApi,
            NodeData::IrBuilder(_) => NodeType::IrBuilder,
            NodeData::DiffPatch(_) => NodeType::DiffPatch,
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(DomainError::from)
}
