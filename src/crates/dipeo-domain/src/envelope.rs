//! The typed envelope that carries every value crossing a node boundary.
//!
//! Envelopes are immutable once emitted. The engine attaches the output
//! label to `meta` before routing; consumers use the typed accessors and
//! get a [`DomainError::ContentTypeMismatch`] instead of a silent coercion
//! when the content type is wrong.

use crate::enums::Status;
use crate::error::{DomainError, Result};
use crate::ids::{ExecutionId, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Content type of an envelope body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeContentType {
    Text,
    Json,
    Binary,
    Error,
    ConversationState,
}

impl EnvelopeContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeContentType::Text => "text",
            EnvelopeContentType::Json => "json",
            EnvelopeContentType::Binary => "binary",
            EnvelopeContentType::Error => "error",
            EnvelopeContentType::ConversationState => "conversation_state",
        }
    }
}

/// Envelope body. JSON-valued except for the binary variant. Adjacently
/// tagged so binary bodies survive a serde round trip (an untagged byte
/// array would come back as a JSON number array).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EnvelopeBody {
    Json(Value),
    Binary(Vec<u8>),
}

/// Well-known `meta` keys. The map stays open; these are the keys the
/// engine and observers agree on.
pub mod meta_keys {
    pub const OUTPUT_LABEL: &str = "output_label";
    pub const MODEL: &str = "model";
    pub const INPUT_TOKENS: &str = "input_tokens";
    pub const OUTPUT_TOKENS: &str = "output_tokens";
    pub const CACHED_TOKENS: &str = "cached_tokens";
    pub const ITERATION: &str = "iteration";
    pub const BATCH_INDEX: &str = "batch_index";
    pub const ERROR_TYPE: &str = "error_type";
    pub const TIMESTAMP: &str = "timestamp";
}

/// The only value type that crosses a node boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub produced_by: NodeId,
    pub trace_id: ExecutionId,
    pub content_type: EnvelopeContentType,
    pub body: EnvelopeBody,
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

impl Envelope {
    /// Wrap plain text.
    pub fn text(body: impl Into<String>, produced_by: NodeId, trace_id: ExecutionId) -> Self {
        Self {
            produced_by,
            trace_id,
            content_type: EnvelopeContentType::Text,
            body: EnvelopeBody::Json(Value::String(body.into())),
            meta: BTreeMap::new(),
        }
    }

    /// Wrap a JSON value.
    pub fn json(body: Value, produced_by: NodeId, trace_id: ExecutionId) -> Self {
        Self {
            produced_by,
            trace_id,
            content_type: EnvelopeContentType::Json,
            body: EnvelopeBody::Json(body),
            meta: BTreeMap::new(),
        }
    }

    /// Wrap raw bytes.
    pub fn binary(body: Vec<u8>, produced_by: NodeId, trace_id: ExecutionId) -> Self {
        Self {
            produced_by,
            trace_id,
            content_type: EnvelopeContentType::Binary,
            body: EnvelopeBody::Binary(body),
            meta: BTreeMap::new(),
        }
    }

    /// Wrap an error. `error_type` lands in `meta` so observers can route
    /// on it without parsing the body.
    pub fn error(
        message: impl Into<String>,
        error_type: impl Into<String>,
        produced_by: NodeId,
        trace_id: ExecutionId,
    ) -> Self {
        let mut meta = BTreeMap::new();
        meta.insert(
            meta_keys::ERROR_TYPE.to_string(),
            Value::String(error_type.into()),
        );
        Self {
            produced_by,
            trace_id,
            content_type: EnvelopeContentType::Error,
            body: EnvelopeBody::Json(Value::String(message.into())),
            meta,
        }
    }

    /// Wrap a conversation (array of role/content messages).
    pub fn conversation(messages: Value, produced_by: NodeId, trace_id: ExecutionId) -> Self {
        Self {
            produced_by,
            trace_id,
            content_type: EnvelopeContentType::ConversationState,
            body: EnvelopeBody::Json(messages),
            meta: BTreeMap::new(),
        }
    }

    /// Builder-style meta attachment.
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// The output label attached by the engine, `default` if unset.
    pub fn output_label(&self) -> &str {
        self.meta
            .get(meta_keys::OUTPUT_LABEL)
            .and_then(Value::as_str)
            .unwrap_or("default")
    }

    pub fn is_error(&self) -> bool {
        self.content_type == EnvelopeContentType::Error
    }

    /// Text body; fails on non-text envelopes.
    pub fn as_text(&self) -> Result<&str> {
        match (&self.content_type, &self.body) {
            (EnvelopeContentType::Text, EnvelopeBody::Json(Value::String(s))) => Ok(s),
            _ => Err(DomainError::ContentTypeMismatch {
                expected: "text",
                actual: self.content_type.as_str(),
            }),
        }
    }

    /// JSON body; accepts `json` and `conversation_state` envelopes.
    pub fn as_json(&self) -> Result<&Value> {
        match (&self.content_type, &self.body) {
            (
                EnvelopeContentType::Json | EnvelopeContentType::ConversationState,
                EnvelopeBody::Json(v),
            ) => Ok(v),
            _ => Err(DomainError::ContentTypeMismatch {
                expected: "json",
                actual: self.content_type.as_str(),
            }),
        }
    }

    /// Error message; fails on non-error envelopes.
    pub fn as_error(&self) -> Result<(&str, &str)> {
        match (&self.content_type, &self.body) {
            (EnvelopeContentType::Error, EnvelopeBody::Json(Value::String(msg))) => {
                let kind = self
                    .meta
                    .get(meta_keys::ERROR_TYPE)
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                Ok((msg, kind))
            }
            _ => Err(DomainError::ContentTypeMismatch {
                expected: "error",
                actual: self.content_type.as_str(),
            }),
        }
    }

    /// Raw bytes; fails on non-binary envelopes.
    pub fn as_binary(&self) -> Result<&[u8]> {
        match (&self.content_type, &self.body) {
            (EnvelopeContentType::Binary, EnvelopeBody::Binary(b)) => Ok(b),
            _ => Err(DomainError::ContentTypeMismatch {
                expected: "binary",
                actual: self.content_type.as_str(),
            }),
        }
    }

    /// Loose view of the body as a JSON value regardless of content type.
    /// Used when shaping handler inputs, where text becomes a JSON string.
    pub fn body_value(&self) -> Value {
        match &self.body {
            EnvelopeBody::Json(v) => v.clone(),
            EnvelopeBody::Binary(b) => Value::String(format!("<{} bytes>", b.len())),
        }
    }

    /// Node status implied when this envelope is a node's final output.
    pub fn implied_status(&self) -> Status {
        if self.is_error() {
            Status::Failed
        } else {
            Status::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids() -> (NodeId, ExecutionId) {
        (NodeId::new("n1"), ExecutionId::new("exec_1"))
    }

    #[test]
    fn test_text_envelope() {
        let (n, e) = ids();
        let env = Envelope::text("hello", n.clone(), e);
        assert_eq!(env.as_text().unwrap(), "hello");
        assert_eq!(env.produced_by, n);
        assert!(env.as_json().is_err());
    }

    #[test]
    fn test_json_envelope() {
        let (n, e) = ids();
        let env = Envelope::json(json!({"x": 1}), n, e);
        assert_eq!(env.as_json().unwrap(), &json!({"x": 1}));
        assert!(env.as_text().is_err());
        assert!(env.as_error().is_err());
    }

    #[test]
    fn test_error_envelope() {
        let (n, e) = ids();
        let env = Envelope::error("boom", "timeout", n, e);
        let (msg, kind) = env.as_error().unwrap();
        assert_eq!(msg, "boom");
        assert_eq!(kind, "timeout");
        assert!(env.is_error());
        assert_eq!(env.implied_status(), Status::Failed);
    }

    #[test]
    fn test_mismatch_is_typed() {
        let (n, e) = ids();
        let env = Envelope::text("x", n, e);
        match env.as_json().unwrap_err() {
            DomainError::ContentTypeMismatch { expected, actual } => {
                assert_eq!(expected, "json");
                assert_eq!(actual, "text");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_output_label_default_and_explicit() {
        let (n, e) = ids();
        let env = Envelope::text("x", n.clone(), e.clone());
        assert_eq!(env.output_label(), "default");
        let env = env.with_meta(meta_keys::OUTPUT_LABEL, json!("condtrue"));
        assert_eq!(env.output_label(), "condtrue");
    }

    #[test]
    fn test_conversation_reads_as_json() {
        let (n, e) = ids();
        let env = Envelope::conversation(json!([{"role": "user", "content": "hi"}]), n, e);
        assert!(env.as_json().unwrap().is_array());
    }

    #[test]
    fn test_envelope_serde_round_trip() {
        let (n, e) = ids();
        let env = Envelope::json(json!({"a": [1, 2]}), n, e)
            .with_meta(meta_keys::MODEL, json!("gpt-4o"));
        let s = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&s).unwrap();
        assert_eq!(back, env);
    }
}
