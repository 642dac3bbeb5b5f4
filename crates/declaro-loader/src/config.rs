//! Loader configuration.

/// Environment variable overriding [`LoaderConfig::base`].
pub const MODULE_BASE_ENV: &str = "DECLARO_MODULE_BASE";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Base that relative keys are joined to: a URL (`https://cdn/mods`),
    /// a `file://` URL or a filesystem path. Empty leaves relative keys
    /// relative.
    pub base: String,
}

impl LoaderConfig {
    pub fn new(base: impl Into<String>) -> Self {
        LoaderConfig { base: base.into() }
    }

    /// Reads the base from `DECLARO_MODULE_BASE`, defaulting to empty.
    pub fn from_env() -> Self {
        let base = std::env::var(MODULE_BASE_ENV).unwrap_or_default();
        if !base.is_empty() {
            tracing::debug!(base = %base, "module base from environment");
        }
        LoaderConfig { base }
    }
}
