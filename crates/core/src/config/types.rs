use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::priority::PriorityLevel;

/// Admission, routing, and cache settings, typically parsed from TOML.
///
/// Option names follow snake_case; the camelCase spellings used by the
/// settings collaborator (`maxConcurrent`, `agingThresholdMs`, ...) are
/// accepted as aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Global admission bound. 0 = available parallelism.
    #[serde(default = "default_max_concurrent", alias = "maxConcurrent")]
    pub max_concurrent: usize,
    /// Wait time before a pending or queued request is promoted one level.
    #[serde(default = "default_aging_threshold_ms", alias = "agingThresholdMs")]
    pub aging_threshold_ms: u64,
    /// Per-item processing deadline. `None` = no deadline.
    #[serde(default, alias = "perItemTimeoutMs")]
    pub per_item_timeout_ms: Option<u64>,
    /// Ceiling on waiting requests. `None` = bounded only by memory.
    #[serde(default, alias = "maxPending")]
    pub max_pending: Option<usize>,
    /// Interval of the router's re-route scan. `None` = a quarter of the
    /// aging threshold.
    #[serde(default, alias = "agingTickMs")]
    pub aging_tick_ms: Option<u64>,
    /// Which execution context serves each priority level.
    #[serde(default = "default_priority_context_map", alias = "priorityContextMap")]
    pub priority_context_map: BTreeMap<PriorityLevel, String>,
    /// Per-context tuning, keyed by context id.
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Settings for one execution context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextConfig {
    /// Dedicated worker threads.
    #[serde(default = "default_context_workers")]
    pub workers: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            workers: default_context_workers(),
        }
    }
}

/// Result cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_entries", alias = "maxEntries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_max_bytes", alias = "maxBytes")]
    pub max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_entries: default_cache_max_entries(),
            max_bytes: default_cache_max_bytes(),
        }
    }
}

fn default_max_concurrent() -> usize { 0 }
fn default_aging_threshold_ms() -> u64 { 2000 }
fn default_context_workers() -> usize { 1 }
fn default_cache_enabled() -> bool { true }
fn default_cache_max_entries() -> usize { 256 }
fn default_cache_max_bytes() -> u64 { 64 * 1024 * 1024 }

const MIN_AGING_TICK_MS: u64 = 10;

/// One context per level.
pub(crate) fn default_priority_context_map() -> BTreeMap<PriorityLevel, String> {
    PriorityLevel::ALL
        .iter()
        .map(|level| (*level, default_context_id(*level).to_string()))
        .collect()
}

fn default_context_id(level: PriorityLevel) -> &'static str {
    match level {
        PriorityLevel::Background => "background",
        PriorityLevel::Utility => "utility",
        PriorityLevel::UserInitiated => "user-initiated",
        PriorityLevel::UserInteractive => "user-interactive",
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            aging_threshold_ms: default_aging_threshold_ms(),
            per_item_timeout_ms: None,
            max_pending: None,
            aging_tick_ms: None,
            priority_context_map: default_priority_context_map(),
            contexts: BTreeMap::new(),
            cache: CacheConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Resolve the admission bound (0 means use available parallelism).
    pub fn resolved_max_concurrent(&self) -> usize {
        if self.max_concurrent == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_concurrent
        }
    }

    pub fn aging_threshold(&self) -> Duration {
        Duration::from_millis(self.aging_threshold_ms)
    }

    pub fn per_item_timeout(&self) -> Option<Duration> {
        self.per_item_timeout_ms.map(Duration::from_millis)
    }

    pub fn aging_tick(&self) -> Duration {
        let ms = self
            .aging_tick_ms
            .unwrap_or(self.aging_threshold_ms / 4)
            .max(MIN_AGING_TICK_MS);
        Duration::from_millis(ms)
    }

    /// Context id serving `level`. Validation guarantees every level is mapped.
    pub fn context_for(&self, level: PriorityLevel) -> &str {
        self.priority_context_map
            .get(&level)
            .map(String::as_str)
            .unwrap_or_else(|| default_context_id(level))
    }

    /// Levels served by a context, lowest first.
    pub fn context_levels(&self, context: &str) -> Vec<PriorityLevel> {
        PriorityLevel::ALL
            .iter()
            .copied()
            .filter(|level| self.context_for(*level) == context)
            .collect()
    }

    /// A context's tier is the highest level it serves, so nothing routed
    /// there runs below its own priority.
    pub fn context_tier(&self, context: &str) -> Option<PriorityLevel> {
        self.context_levels(context).into_iter().max()
    }

    /// Distinct context ids ordered by tier, lowest first.
    pub fn context_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for level in PriorityLevel::ALL {
            let id = self.context_for(level);
            if !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }

    pub fn workers_for(&self, context: &str) -> usize {
        self.contexts
            .get(context)
            .map(|c| c.workers)
            .unwrap_or_else(default_context_workers)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Pipeline config loaded:");
        tracing::info!(
            "  admission:  max_concurrent={}, max_pending={}",
            self.resolved_max_concurrent(),
            self.max_pending
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unbounded".into())
        );
        tracing::info!(
            "  aging:      threshold={:?}, tick={:?}",
            self.aging_threshold(),
            self.aging_tick()
        );
        tracing::info!("  timeout:    per_item={:?}", self.per_item_timeout());
        for id in self.context_ids() {
            let levels: Vec<&str> = self.context_levels(&id).iter().map(|l| l.as_str()).collect();
            tracing::info!(
                "  context:    {} workers={} levels=[{}]",
                id,
                self.workers_for(&id),
                levels.join(", ")
            );
        }
        tracing::info!(
            "  cache:      enabled={}, max_entries={}, max_bytes={}",
            self.cache.enabled,
            self.cache.max_entries,
            self.cache.max_bytes
        );
    }
}
