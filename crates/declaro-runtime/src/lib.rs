//! Reactive runtime for declaro programs.
//!
//! Builds a live instance from a [`declaro_core::ProgramDef`]: a reactive
//! graph of state, computed and effect nodes, an action dispatcher that
//! mutates the graph in batches, and a hot-update engine that reconciles
//! the live instance with revised definitions in place.
//!
//! # Modules
//!
//! - [`resolver`]: pure expression evaluation over a [`resolver::Scope`]
//! - [`graph`]: the reactive graph, mutations, effects and invariants
//! - [`dispatch`]: the action registry and dispatcher
//! - [`hot`]: hot-update reconciliation and its report
//! - [`runtime`]: the [`Runtime`] facade tying them together
//! - [`events`]: lifecycle and diagnostic events
//! - [`pubsub`]: the keyed callback registry behind subscriptions and events
//! - [`config`]: runtime configuration
//! - [`error`]: the [`RuntimeError`] taxonomy
//!
//! Everything here is single-threaded. Hold a [`Runtime`] on one thread (or
//! a `tokio::task::LocalSet`) and serialize dispatches.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod graph;
pub mod hot;
pub mod pubsub;
pub mod resolver;
pub mod runtime;

// Re-export commonly used types
pub use config::{InvariantPolicy, RuntimeConfig};
pub use dispatch::Dispatcher;
pub use error::RuntimeError;
pub use events::{ErrorOrigin, EventBus, EventKind, InvariantViolation, RuntimeEvent};
pub use graph::{EffectHost, EffectStatus, Mutation, ReactiveGraph, ScheduledEffect, StateReconciliation};
pub use hot::UpdateReport;
pub use pubsub::{Registry, Unsubscribe};
pub use resolver::{resolve, values_equal, Bindings, EmptyScope, Scope};
pub use runtime::{RenderTarget, Runtime};
