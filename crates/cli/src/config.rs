use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clipdeck_core::PipelineConfig;
use tracing::debug;

/// Return the default config directory path: ~/.config/clipdeck/
pub fn default_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("could not determine user config directory")?
        .join("clipdeck");
    Ok(config_dir)
}

/// Return the default config file path.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join("config.toml"))
}

/// Load the pipeline config from the given path, or the default path.
/// Falls back to defaults plus `CLIPDECK_*` overrides if the file does not
/// exist.
pub fn load(path: Option<&Path>) -> Result<(PipelineConfig, PathBuf)> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    let config = if config_path.exists() {
        debug!(?config_path, "Loading config");
        PipelineConfig::from_file(&config_path)
            .with_context(|| format!("failed to load config: {}", config_path.display()))?
    } else if path.is_some() {
        anyhow::bail!("config file not found: {}", config_path.display());
    } else {
        debug!(?config_path, "Config file not found, using defaults");
        PipelineConfig::from_env().context("invalid configuration from environment")?
    };
    Ok((config, config_path))
}

/// Serialize `config` as TOML and write it to `path`, creating parents.
pub fn write(config: &PipelineConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let toml_str = to_toml(config)?;
    std::fs::write(path, toml_str)
        .with_context(|| format!("failed to write config: {}", path.display()))?;
    Ok(())
}

pub fn to_toml(config: &PipelineConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to serialize config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load(Some(&missing)).is_err());
    }

    #[test]
    fn written_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = PipelineConfig::default();
        config.max_concurrent = 3;
        config.per_item_timeout_ms = Some(750);
        write(&config, &path).unwrap();

        let (loaded, from) = load(Some(&path)).unwrap();
        assert_eq!(from, path);
        assert_eq!(loaded.max_concurrent, 3);
        assert_eq!(loaded.per_item_timeout_ms, Some(750));
        assert_eq!(loaded.priority_context_map, config.priority_context_map);
    }
}
