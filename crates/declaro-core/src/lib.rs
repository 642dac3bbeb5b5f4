//! Program-definition data model for declaro.
//!
//! A declaro program is a JSON document describing state, derived values,
//! actions, side-effecting reactions, invariants, components and a UI tree.
//! This crate holds the serde types for that document, the expression AST
//! evaluated by the runtime, and the envelope of live-update messages.

pub mod error;
pub mod expr;
pub mod message;
pub mod module;
pub mod program;
pub mod types;

// Re-export commonly used types
pub use error::CoreError;
pub use expr::{Arity, Expr, Op, RefPath};
pub use message::HotMessage;
pub use module::{ModuleDocument, MODULE_FORMAT_MARKER, MODULE_FORMAT_VERSION};
pub use program::{
    ActionDef, ComputedDef, EffectDef, EffectRun, InvariantDef, MutationDef, MutationKind,
    ProgramDef, ProgramUpdate, Section, StateDef, Trigger,
};
pub use types::{type_name_of, ValueType};
