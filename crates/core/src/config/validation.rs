use crate::error::ConfigError;
use crate::priority::PriorityLevel;

use super::types::PipelineConfig;

impl PipelineConfig {
    /// Validate the config: routing table coverage, context shape, bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_bounds()?;
        self.validate_priority_coverage()?;
        self.validate_contiguous_contexts()?;
        self.validate_context_settings()?;
        Ok(())
    }

    fn validate_bounds(&self) -> Result<(), ConfigError> {
        if self.aging_threshold_ms == 0 {
            return Err(ConfigError::Invalid(
                "aging_threshold_ms must be greater than zero".into(),
            ));
        }
        if self.per_item_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "per_item_timeout_ms must be greater than zero when set".into(),
            ));
        }
        if self.max_pending == Some(0) {
            return Err(ConfigError::Invalid(
                "max_pending must be greater than zero when set".into(),
            ));
        }
        if self.cache.enabled && (self.cache.max_entries == 0 || self.cache.max_bytes == 0) {
            return Err(ConfigError::Invalid(
                "cache.max_entries and cache.max_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Every level must map to a named context. The map is keyed by level,
    /// so a level can never appear twice.
    fn validate_priority_coverage(&self) -> Result<(), ConfigError> {
        for level in PriorityLevel::ALL {
            match self.priority_context_map.get(&level) {
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "priority_context_map has no entry for '{level}'"
                    )))
                }
                Some(id) if id.trim().is_empty() => {
                    return Err(ConfigError::Invalid(format!(
                        "priority_context_map entry for '{level}' is empty"
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// A merged context must serve a contiguous run of levels. Serving
    /// `background` and `userInteractive` while `utility` lives elsewhere
    /// would rank unrelated tiers together.
    fn validate_contiguous_contexts(&self) -> Result<(), ConfigError> {
        for id in self.context_ids() {
            let ranks: Vec<usize> = self.context_levels(&id).iter().map(|l| l.rank()).collect();
            let contiguous = ranks.windows(2).all(|pair| pair[1] == pair[0] + 1);
            if !contiguous {
                return Err(ConfigError::Invalid(format!(
                    "context '{id}' serves non-adjacent priority levels"
                )));
            }
        }
        Ok(())
    }

    fn validate_context_settings(&self) -> Result<(), ConfigError> {
        let mapped = self.context_ids();
        for (id, settings) in &self.contexts {
            if !mapped.iter().any(|m| m == id) {
                return Err(ConfigError::Invalid(format!(
                    "context '{id}' is configured but no priority level maps to it"
                )));
            }
            if settings.workers == 0 {
                return Err(ConfigError::Invalid(format!(
                    "context '{id}' must have at least one worker"
                )));
            }
        }
        Ok(())
    }
}
