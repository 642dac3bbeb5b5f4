//! Loadable module documents.
//!
//! Modules are externally-hosted program fragments fetched by the loader:
//! a set of named components, an optional partial program definition, or
//! both. A document must carry the format marker to be accepted.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::program::ProgramUpdate;

/// Top-level key every module document must carry.
pub const MODULE_FORMAT_MARKER: &str = "declaro";

/// Value of the format marker understood by this version.
pub const MODULE_FORMAT_VERSION: &str = "module/1";

/// A parsed module document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDocument {
    /// Canonical key the document was loaded from.
    #[serde(default)]
    pub key: String,
    /// Hex-encoded content hash of the source text.
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub components: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<ProgramUpdate>,
}

impl ModuleDocument {
    pub fn component(&self, name: &str) -> Option<&Value> {
        self.components.get(name)
    }
}
