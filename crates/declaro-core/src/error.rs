//! Core error types for declaro-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! ways a program document can be malformed before it ever reaches the
//! runtime.

use thiserror::Error;

/// Definition-level errors produced while parsing or validating a program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// An expression used an unknown operator or an unrecognized shape.
    #[error("invalid expression: {reason}")]
    InvalidExpression { reason: String },

    /// A mutation instruction carries a value it must not have, or lacks one
    /// it requires.
    #[error("invalid mutation on '{target}' ({op}): {reason}")]
    InvalidMutation {
        target: String,
        op: String,
        reason: String,
    },

    /// An effect definition is structurally inconsistent with its trigger.
    #[error("invalid effect '{id}': {reason}")]
    InvalidEffect { id: String, reason: String },

    /// The same identifier is declared as both state and computed.
    #[error("identifier '{id}' is declared more than once")]
    ConflictingIdentifier { id: String },

    /// The document is not valid JSON or does not match the program schema.
    #[error("malformed document: {reason}")]
    Malformed { reason: String },
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Malformed {
            reason: err.to_string(),
        }
    }
}
