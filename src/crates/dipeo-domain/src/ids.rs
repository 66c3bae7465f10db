//! Branded identifier types.
//!
//! All identifiers are opaque strings. The newtypes exist so a `NodeId` can
//! never be passed where an `ExecutionId` is expected; equality is plain
//! string equality.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(
    /// Identifier of a node within a diagram.
    NodeId
);
branded_id!(
    /// Identifier of an arrow (directed edge between two handles).
    ArrowId
);
branded_id!(
    /// Canonical handle identifier, `{node_id}_{label}_{direction}`.
    HandleId
);
branded_id!(
    /// Identifier of an LLM agent identity.
    PersonId
);
branded_id!(
    /// Identifier of one execution of a diagram.
    ExecutionId
);
branded_id!(
    /// Identifier of a stored diagram.
    DiagramId
);
branded_id!(
    /// Identifier of a configured API key.
    ApiKeyId
);

impl ExecutionId {
    /// Generate a fresh execution ID (`exec_<uuid>`).
    pub fn generate() -> Self {
        Self(format!("exec_{}", uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_string_equality() {
        assert_eq!(NodeId::new("node_1"), NodeId::from("node_1"));
        assert_ne!(NodeId::new("node_1"), NodeId::new("node_2"));
    }

    #[test]
    fn test_id_serde_transparent() {
        let id = ExecutionId::new("exec_abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"exec_abc\"");
        let back: ExecutionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_generate_execution_id_unique() {
        assert_ne!(ExecutionId::generate(), ExecutionId::generate());
    }
}
