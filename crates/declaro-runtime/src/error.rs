//! Runtime error types for the resolver, reactive graph, dispatcher and
//! hot-update engine.
//!
//! Errors are `Clone + Serialize` so they can be published on the event bus
//! as well as returned to the caller. They carry the identifier involved so
//! a collaborator can point at the offending definition.

use declaro_core::{CoreError, Section};
use serde::{Deserialize, Serialize};

/// Errors produced by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum RuntimeError {
    #[error("unresolved reference '{id}'")]
    UnresolvedReference { id: String },

    #[error("invalid expression: {reason}")]
    InvalidExpression { reason: String },

    #[error("type mismatch on '{id}': expected {expected}, got {got}")]
    TypeMismatch {
        id: String,
        expected: String,
        got: String,
    },

    #[error("identifier '{id}' is already defined")]
    DuplicateIdentifier { id: String },

    #[error("'{id}' is computed and cannot be written")]
    NotWritable { id: String },

    #[error("dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("action '{action}' is not defined")]
    ActionUndefined { action: String },

    #[error("component '{name}' is not registered")]
    ComponentNotFound { name: String },

    /// Effects retriggered each other past the configured nesting limit.
    #[error("effect '{effect}' exceeded the nesting limit of {limit}")]
    EffectDepthExceeded { effect: String, limit: usize },

    /// Only returned under the rollback invariant policy; otherwise
    /// violations are published, not raised.
    #[error("invariant '{name}' violated: {message}")]
    InvariantViolation { name: String, message: String },

    #[error("update of section '{section}' failed: {source}")]
    UpdateFailed {
        section: Section,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("invalid definition: {reason}")]
    InvalidDefinition { reason: String },
}

impl From<CoreError> for RuntimeError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidExpression { reason } => RuntimeError::InvalidExpression { reason },
            CoreError::ConflictingIdentifier { id } => RuntimeError::DuplicateIdentifier { id },
            other => RuntimeError::InvalidDefinition {
                reason: other.to_string(),
            },
        }
    }
}

impl RuntimeError {
    pub(crate) fn type_mismatch(id: &str, expected: &str, got: &serde_json::Value) -> Self {
        RuntimeError::TypeMismatch {
            id: id.to_string(),
            expected: expected.to_string(),
            got: declaro_core::type_name_of(got).to_string(),
        }
    }
}
