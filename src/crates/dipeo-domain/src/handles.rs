//! Handle ID algebra.
//!
//! A handle is an addressable input or output port on a node. The canonical
//! internal form is `{node_id}_{label}_{direction}`. Node IDs may themselves
//! contain underscores, so parsing splits from the right: the last token is
//! the direction, the second-to-last the label, and everything before them
//! (rejoined on `_`) is the node ID.
//!
//! `parse(create(n, l, d)) == (n, l, d)` for every valid triple, and parsing
//! fails loudly on an unknown direction or label.

use crate::enums::{DataType, HandleDirection, HandleLabel, NodeType};
use crate::error::{DomainError, Result};
use crate::ids::{HandleId, NodeId};

/// Parsed components of a canonical handle ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHandle {
    pub node_id: NodeId,
    pub label: HandleLabel,
    pub direction: HandleDirection,
}

/// Create a canonical handle ID from its components.
pub fn create_handle_id(
    node_id: &NodeId,
    label: HandleLabel,
    direction: HandleDirection,
) -> HandleId {
    HandleId::new(format!("{}_{}_{}", node_id, label, direction))
}

/// Parse a canonical handle ID into its components.
///
/// Fails when the ID has fewer than three `_`-separated parts, when the
/// node ID portion is empty, or when the direction or label token is not a
/// known variant.
pub fn parse_handle_id(handle_id: &HandleId) -> Result<ParsedHandle> {
    let parts: Vec<&str> = handle_id.as_str().split('_').collect();
    if parts.len() < 3 {
        return Err(DomainError::handle(format!(
            "invalid handle ID '{}': expected nodeId_label_direction",
            handle_id
        )));
    }

    let direction: HandleDirection = parts[parts.len() - 1].parse().map_err(|_| {
        DomainError::handle(format!(
            "invalid direction '{}' in handle ID '{}'",
            parts[parts.len() - 1],
            handle_id
        ))
    })?;
    let label: HandleLabel = parts[parts.len() - 2].parse().map_err(|_| {
        DomainError::handle(format!(
            "invalid label '{}' in handle ID '{}'",
            parts[parts.len() - 2],
            handle_id
        ))
    })?;

    let node_id = parts[..parts.len() - 2].join("_");
    if node_id.is_empty() {
        return Err(DomainError::handle(format!(
            "invalid handle ID '{}': node ID cannot be empty",
            handle_id
        )));
    }

    Ok(ParsedHandle {
        node_id: NodeId::new(node_id),
        label,
        direction,
    })
}

/// Extract just the node ID from a handle ID, or `None` if it is malformed.
pub fn extract_node_id(handle_id: &HandleId) -> Option<NodeId> {
    parse_handle_id(handle_id).ok().map(|p| p.node_id)
}

/// Whether a string is a well-formed canonical handle ID.
pub fn is_valid_handle_id(candidate: &str) -> bool {
    parse_handle_id(&HandleId::new(candidate)).is_ok()
}

/// A single entry in a node type's handle specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleSpec {
    pub label: HandleLabel,
    pub direction: HandleDirection,
    pub data_type: DataType,
    pub required: bool,
}

const fn spec(
    label: HandleLabel,
    direction: HandleDirection,
    data_type: DataType,
    required: bool,
) -> HandleSpec {
    HandleSpec {
        label,
        direction,
        data_type,
        required,
    }
}

const DEFAULT_IN_OUT: &[HandleSpec] = &[
    spec(
        HandleLabel::Default,
        HandleDirection::Input,
        DataType::Any,
        true,
    ),
    spec(
        HandleLabel::Default,
        HandleDirection::Output,
        DataType::Any,
        true,
    ),
];

const START_SPECS: &[HandleSpec] = &[spec(
    HandleLabel::Default,
    HandleDirection::Output,
    DataType::Any,
    true,
)];

const ENDPOINT_SPECS: &[HandleSpec] = &[spec(
    HandleLabel::Default,
    HandleDirection::Input,
    DataType::Any,
    true,
)];

const CONDITION_SPECS: &[HandleSpec] = &[
    spec(
        HandleLabel::Default,
        HandleDirection::Input,
        DataType::Any,
        true,
    ),
    spec(
        HandleLabel::Condtrue,
        HandleDirection::Output,
        DataType::Boolean,
        true,
    ),
    spec(
        HandleLabel::Condfalse,
        HandleDirection::Output,
        DataType::Boolean,
        true,
    ),
];

const PERSON_JOB_SPECS: &[HandleSpec] = &[
    spec(
        HandleLabel::First,
        HandleDirection::Input,
        DataType::Any,
        false,
    ),
    spec(
        HandleLabel::Default,
        HandleDirection::Input,
        DataType::Any,
        true,
    ),
    spec(
        HandleLabel::Default,
        HandleDirection::Output,
        DataType::Any,
        true,
    ),
];

/// The per-node-type handle specification table.
///
/// Drives both compile-time validation of `[bracket]` references and default
/// handle generation for diagrams declared without explicit handles.
pub fn handle_specs(node_type: NodeType) -> &'static [HandleSpec] {
    match node_type {
        NodeType::Start => START_SPECS,
        NodeType::Endpoint => ENDPOINT_SPECS,
        NodeType::Condition => CONDITION_SPECS,
        NodeType::PersonJob => PERSON_JOB_SPECS,
        _ => DEFAULT_IN_OUT,
    }
}

/// Validate a `Label[handle]` bracket reference against the node type's
/// handle specification.
///
/// Bracket syntax is explicit, so unknown handles fail loudly with the set
/// of available handles in the message.
pub fn validate_bracket_syntax(
    node_label: &str,
    handle_name: &str,
    node_type: NodeType,
    direction: HandleDirection,
) -> Result<HandleLabel> {
    let specs = handle_specs(node_type);
    let available = || {
        specs
            .iter()
            .filter(|s| s.direction == direction)
            .map(|s| s.label.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let label: HandleLabel = handle_name.parse().map_err(|_| {
        DomainError::handle(format!(
            "invalid handle '{}' for node '{}' of type '{}'; available {} handles: [{}]",
            handle_name,
            node_label,
            node_type,
            direction,
            available()
        ))
    })?;

    if !specs
        .iter()
        .any(|s| s.label == label && s.direction == direction)
    {
        return Err(DomainError::handle(format!(
            "handle '{}' does not exist as {} handle for node '{}' of type '{}'; available: [{}]",
            handle_name,
            direction,
            node_label,
            node_type,
            available()
        )));
    }

    Ok(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_create_parse_round_trip() {
        let id = create_handle_id(
            &NodeId::new("node_123"),
            HandleLabel::Default,
            HandleDirection::Output,
        );
        assert_eq!(id.as_str(), "node_123_default_output");

        let parsed = parse_handle_id(&id).unwrap();
        assert_eq!(parsed.node_id, NodeId::new("node_123"));
        assert_eq!(parsed.label, HandleLabel::Default);
        assert_eq!(parsed.direction, HandleDirection::Output);
    }

    #[test]
    fn test_parse_node_id_with_underscores() {
        let parsed = parse_handle_id(&HandleId::new("my_long_node_name_condtrue_output")).unwrap();
        assert_eq!(parsed.node_id.as_str(), "my_long_node_name");
        assert_eq!(parsed.label, HandleLabel::Condtrue);
    }

    #[test]
    fn test_parse_rejects_unknown_direction() {
        let err = parse_handle_id(&HandleId::new("node_default_sideways")).unwrap_err();
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn test_parse_rejects_unknown_label() {
        assert!(parse_handle_id(&HandleId::new("node_custom_output")).is_err());
    }

    #[test]
    fn test_parse_rejects_too_few_parts() {
        assert!(parse_handle_id(&HandleId::new("default_output")).is_err());
        assert!(parse_handle_id(&HandleId::new("output")).is_err());
    }

    #[test]
    fn test_extract_node_id() {
        assert_eq!(
            extract_node_id(&HandleId::new("n1_first_input")),
            Some(NodeId::new("n1"))
        );
        assert_eq!(extract_node_id(&HandleId::new("garbage")), None);
    }

    #[test]
    fn test_condition_specs_have_two_outputs() {
        let outputs: Vec<_> = handle_specs(NodeType::Condition)
            .iter()
            .filter(|s| s.direction == HandleDirection::Output)
            .collect();
        assert_eq!(outputs.len(), 2);
    }

    #[test]
    fn test_validate_bracket_syntax() {
        assert_eq!(
            validate_bracket_syntax(
                "Check",
                "condtrue",
                NodeType::Condition,
                HandleDirection::Output
            )
            .unwrap(),
            HandleLabel::Condtrue
        );
        // condition has no condtrue input
        assert!(validate_bracket_syntax(
            "Check",
            "condtrue",
            NodeType::Condition,
            HandleDirection::Input
        )
        .is_err());
        // unknown label altogether
        let err = validate_bracket_syntax(
            "Job",
            "bogus",
            NodeType::CodeJob,
            HandleDirection::Input,
        )
        .unwrap_err();
        assert!(err.to_string().contains("available"));
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            node in "[a-z][a-z0-9_]{0,20}",
            label_ix in 0usize..5,
            dir_ix in 0usize..2,
        ) {
            let labels = [
                HandleLabel::Default,
                HandleLabel::First,
                HandleLabel::Condtrue,
                HandleLabel::Condfalse,
                HandleLabel::Results,
            ];
            let dirs = [HandleDirection::Input, HandleDirection::Output];
            let node_id = NodeId::new(node);
            let id = create_handle_id(&node_id, labels[label_ix], dirs[dir_ix]);
            let parsed = parse_handle_id(&id).unwrap();
            prop_assert_eq!(parsed.node_id, node_id);
            prop_assert_eq!(parsed.label, labels[label_ix]);
            prop_assert_eq!(parsed.direction, dirs[dir_ix]);
        }
    }
}
