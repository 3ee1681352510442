use std::path::Path;

use crate::error::ConfigError;

use super::types::PipelineConfig;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

impl PipelineConfig {
    /// Parse config from a TOML string, apply `CLIPDECK_*` overrides, validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// - `CLIPDECK_MAX_CONCURRENT` -> `max_concurrent`
    /// - `CLIPDECK_AGING_THRESHOLD_MS` -> `aging_threshold_ms`
    /// - `CLIPDECK_PER_ITEM_TIMEOUT_MS` -> `per_item_timeout_ms`
    /// - `CLIPDECK_MAX_PENDING` -> `max_pending`
    /// - `CLIPDECK_CACHE_ENABLED` -> `cache.enabled`
    /// - `CLIPDECK_CACHE_MAX_ENTRIES` -> `cache.max_entries`
    /// - `CLIPDECK_CACHE_MAX_BYTES` -> `cache.max_bytes`
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let parsed = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(n) = parsed("CLIPDECK_MAX_CONCURRENT").and_then(|v| v.parse().ok()) {
            self.max_concurrent = n;
        }
        if let Some(ms) = parsed("CLIPDECK_AGING_THRESHOLD_MS").and_then(|v| v.parse().ok()) {
            self.aging_threshold_ms = ms;
        }
        if let Some(ms) = parsed("CLIPDECK_PER_ITEM_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.per_item_timeout_ms = Some(ms);
        }
        if let Some(n) = parsed("CLIPDECK_MAX_PENDING").and_then(|v| v.parse().ok()) {
            self.max_pending = Some(n);
        }
        if let Some(v) = parsed("CLIPDECK_CACHE_ENABLED") {
            self.cache.enabled = matches!(v.as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(n) = parsed("CLIPDECK_CACHE_MAX_ENTRIES").and_then(|v| v.parse().ok()) {
            self.cache.max_entries = n;
        }
        if let Some(n) = parsed("CLIPDECK_CACHE_MAX_BYTES").and_then(|v| v.parse().ok()) {
            self.cache.max_bytes = n;
        }
    }
}
