//! Live-update transport messages.
//!
//! A transport collaborator (dev server, socket, file watcher) delivers
//! [`HotMessage`]s. The runtime routes `update` payloads to its hot-update
//! engine, and turns the remaining kinds into lifecycle events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::program::ProgramUpdate;

/// A message on the live-update channel, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HotMessage {
    /// A partial program definition to reconcile into the live instance.
    Update { payload: ProgramUpdate },
    /// The embedding target should discard the instance and reload it.
    FullReload,
    /// A diagnostic from the producer (e.g. a failed source build).
    Error { payload: Value },
    /// The transport connected.
    Connected,
    /// The transport disconnected.
    Disconnected,
}

impl HotMessage {
    pub fn from_json(text: &str) -> Result<Self, crate::CoreError> {
        let message: HotMessage = serde_json::from_str(text)?;
        if let HotMessage::Update { payload } = &message {
            payload.validate()?;
        }
        Ok(message)
    }
}
