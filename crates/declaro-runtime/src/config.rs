//! Runtime configuration.
//!
//! Defaults suit embedded use. [`RuntimeConfig::from_env`] reads overrides:
//! - `DECLARO_MAX_EFFECT_DEPTH`: nesting limit for effect re-triggering
//! - `DECLARO_INVARIANT_POLICY`: `report` (default) or `rollback`

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What happens when an invariant fails after a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvariantPolicy {
    /// Commit the batch, then publish the violation.
    #[default]
    Report,
    /// Restore the pre-batch values, publish the violation and fail the batch.
    Rollback,
}

impl FromStr for InvariantPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "report" => Ok(InvariantPolicy::Report),
            "rollback" => Ok(InvariantPolicy::Rollback),
            other => Err(format!(
                "unknown invariant policy '{}': use report or rollback",
                other
            )),
        }
    }
}

/// Configuration for a runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum nesting of effects triggered by effects. Default: 64.
    pub max_effect_depth: usize,
    pub invariant_policy: InvariantPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_effect_depth: 64,
            invariant_policy: InvariantPolicy::Report,
        }
    }
}

impl RuntimeConfig {
    /// Builds a config from defaults overridden by environment variables.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = RuntimeConfig::default();

        if let Ok(raw) = std::env::var("DECLARO_MAX_EFFECT_DEPTH") {
            match raw.parse::<usize>() {
                Ok(depth) if depth > 0 => config.max_effect_depth = depth,
                _ => tracing::warn!("ignoring DECLARO_MAX_EFFECT_DEPTH={:?}", raw),
            }
        }

        if let Ok(raw) = std::env::var("DECLARO_INVARIANT_POLICY") {
            match raw.parse::<InvariantPolicy>() {
                Ok(policy) => config.invariant_policy = policy,
                Err(msg) => tracing::warn!("ignoring DECLARO_INVARIANT_POLICY: {}", msg),
            }
        }

        config
    }
}
