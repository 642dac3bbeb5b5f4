//! Lifecycle and diagnostic events observable through `Runtime::on`.
//!
//! Invariant violations, effect failures and update failures must not
//! interrupt a batch or update that has already been partially applied, so
//! they are published here instead of being raised.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::error::RuntimeError;
use crate::hot::UpdateReport;
use crate::pubsub::{Registry, Unsubscribe};

/// The event channels a collaborator can listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Connected,
    Disconnected,
    Update,
    FullReload,
    Error,
    InvariantViolation,
    Effect,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Update => "update",
            EventKind::FullReload => "full-reload",
            EventKind::Error => "error",
            EventKind::InvariantViolation => "invariant-violation",
            EventKind::Effect => "effect",
        }
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(EventKind::Connected),
            "disconnected" => Ok(EventKind::Disconnected),
            "update" => Ok(EventKind::Update),
            "full-reload" => Ok(EventKind::FullReload),
            "error" => Ok(EventKind::Error),
            "invariant-violation" => Ok(EventKind::InvariantViolation),
            "effect" => Ok(EventKind::Effect),
            other => Err(format!("unknown event '{}'", other)),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a reported error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorOrigin {
    /// A diagnostic delivered by the transport.
    Transport,
    /// An effect run triggered by a notification.
    Effect,
    /// A hot update that failed part-way.
    Update,
}

/// A failed invariant check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvariantViolation {
    pub name: String,
    pub message: String,
}

/// Payload of an [`EventKind`] emission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuntimeEvent {
    Connected,
    Disconnected,
    Update { report: UpdateReport },
    FullReload,
    Error { origin: ErrorOrigin, detail: Value },
    InvariantViolation(InvariantViolation),
    Effect { event: String, value: Value },
}

impl RuntimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RuntimeEvent::Connected => EventKind::Connected,
            RuntimeEvent::Disconnected => EventKind::Disconnected,
            RuntimeEvent::Update { .. } => EventKind::Update,
            RuntimeEvent::FullReload => EventKind::FullReload,
            RuntimeEvent::Error { .. } => EventKind::Error,
            RuntimeEvent::InvariantViolation(_) => EventKind::InvariantViolation,
            RuntimeEvent::Effect { .. } => EventKind::Effect,
        }
    }

    pub(crate) fn from_error(origin: ErrorOrigin, err: &RuntimeError) -> Self {
        RuntimeEvent::Error {
            origin,
            detail: serde_json::json!({
                "message": err.to_string(),
                "error": serde_json::to_value(err).unwrap_or(Value::Null),
            }),
        }
    }
}

/// Event bus shared by the graph, dispatcher and runtime facade.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Registry<EventKind, RuntimeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            registry: Registry::new(),
        }
    }

    pub fn on(&self, kind: EventKind, callback: impl Fn(&RuntimeEvent) + 'static) -> Unsubscribe {
        self.registry.subscribe(kind, callback)
    }

    pub fn emit(&self, event: RuntimeEvent) {
        let kind = event.kind();
        tracing::trace!(event = %kind, "emit");
        self.registry.emit(&kind, &event);
    }

    pub fn clear(&self) {
        self.registry.clear();
    }
}
