//! Closed enums shared across the diagram and execution models.

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of node types the runtime knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    Endpoint,
    PersonJob,
    Condition,
    CodeJob,
    ApiJob,
    Db,
    SubDiagram,
    TemplateJob,
    JsonSchemaValidator,
    Hook,
    UserResponse,
    TypescriptAst,
    IntegratedApi,
    IrBuilder,
    DiffPatch,
}

impl NodeType {
    pub const ALL: [NodeType; 16] = [
        NodeType::Start,
        NodeType::Endpoint,
        NodeType::PersonJob,
        NodeType::Condition,
        NodeType::CodeJob,
        NodeType::ApiJob,
        NodeType::Db,
        NodeType::SubDiagram,
        NodeType::TemplateJob,
        NodeType::JsonSchemaValidator,
        NodeType::Hook,
        NodeType::UserResponse,
        NodeType::TypescriptAst,
        NodeType::IntegratedApi,
        NodeType::IrBuilder,
        NodeType::DiffPatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::Endpoint => "endpoint",
            NodeType::PersonJob => "person_job",
            NodeType::Condition => "condition",
            NodeType::CodeJob => "code_job",
            NodeType::ApiJob => "api_job",
            NodeType::Db => "db",
            NodeType::SubDiagram => "sub_diagram",
            NodeType::TemplateJob => "template_job",
            NodeType::JsonSchemaValidator => "json_schema_validator",
            NodeType::Hook => "hook",
            NodeType::UserResponse => "user_response",
            NodeType::TypescriptAst => "typescript_ast",
            NodeType::IntegratedApi => "integrated_api",
            NodeType::IrBuilder => "ir_builder",
            NodeType::DiffPatch => "diff_patch",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::unknown_variant("node type", s))
    }
}

/// Direction of a handle: whether the port accepts or produces values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleDirection {
    Input,
    Output,
}

impl HandleDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleDirection::Input => "input",
            HandleDirection::Output => "output",
        }
    }
}

impl fmt::Display for HandleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandleDirection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(HandleDirection::Input),
            "output" => Ok(HandleDirection::Output),
            other => Err(DomainError::unknown_variant("handle direction", other)),
        }
    }
}

/// The closed set of handle labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleLabel {
    Default,
    First,
    Condtrue,
    Condfalse,
    Results,
}

impl HandleLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleLabel::Default => "default",
            HandleLabel::First => "first",
            HandleLabel::Condtrue => "condtrue",
            HandleLabel::Condfalse => "condfalse",
            HandleLabel::Results => "results",
        }
    }
}

impl fmt::Display for HandleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandleLabel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(HandleLabel::Default),
            "first" => Ok(HandleLabel::First),
            "condtrue" => Ok(HandleLabel::Condtrue),
            "condfalse" => Ok(HandleLabel::Condfalse),
            "results" => Ok(HandleLabel::Results),
            other => Err(DomainError::unknown_variant("handle label", other)),
        }
    }
}

/// Declared data type of a handle. Advisory; `Any` accepts everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Object,
    Array,
}

/// Content type annotation carried on arrows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrowContentType {
    RawText,
    ConversationState,
    Object,
    Variable,
    Json,
}

impl ArrowContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrowContentType::RawText => "raw_text",
            ArrowContentType::ConversationState => "conversation_state",
            ArrowContentType::Object => "object",
            ArrowContentType::Variable => "variable",
            ArrowContentType::Json => "json",
        }
    }
}

impl FromStr for ArrowContentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw_text" => Ok(ArrowContentType::RawText),
            "conversation_state" => Ok(ArrowContentType::ConversationState),
            "object" => Ok(ArrowContentType::Object),
            "variable" => Ok(ArrowContentType::Variable),
            "json" => Ok(ArrowContentType::Json),
            other => Err(DomainError::unknown_variant("content type", other)),
        }
    }
}

/// Execution and node status, one terminal set for both levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Skipped,
    Aborted,
    MaxiterReached,
}

impl Status {
    /// Terminal statuses cannot transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Completed
                | Status::Failed
                | Status::Skipped
                | Status::Aborted
                | Status::MaxiterReached
        )
    }

    /// Terminal statuses that count as success for exit-code purposes.
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Completed | Status::MaxiterReached)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "PENDING",
            Status::Running => "RUNNING",
            Status::Paused => "PAUSED",
            Status::Completed => "COMPLETED",
            Status::Failed => "FAILED",
            Status::Skipped => "SKIPPED",
            Status::Aborted => "ABORTED",
            Status::MaxiterReached => "MAXITER_REACHED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_round_trip() {
        for t in NodeType::ALL {
            assert_eq!(t.as_str().parse::<NodeType>().unwrap(), t);
        }
    }

    #[test]
    fn test_node_type_serde_snake_case() {
        let json = serde_json::to_string(&NodeType::PersonJob).unwrap();
        assert_eq!(json, "\"person_job\"");
        let back: NodeType = serde_json::from_str("\"json_schema_validator\"").unwrap();
        assert_eq!(back, NodeType::JsonSchemaValidator);
    }

    #[test]
    fn test_unknown_node_type_fails() {
        assert!("not_a_node".parse::<NodeType>().is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(Status::Completed.is_terminal());
        assert!(Status::MaxiterReached.is_terminal());
        assert!(!Status::Running.is_terminal());
        assert!(!Status::Paused.is_terminal());
        assert!(Status::MaxiterReached.is_success());
        assert!(!Status::Failed.is_success());
    }

    #[test]
    fn test_status_serde_screaming() {
        assert_eq!(
            serde_json::to_string(&Status::MaxiterReached).unwrap(),
            "\"MAXITER_REACHED\""
        );
    }

    #[test]
    fn test_handle_direction_rejects_unknown() {
        assert!("sideways".parse::<HandleDirection>().is_err());
    }
}
