use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const DEFAULT_MAX_UNINDEXED_REPOS: usize = 200;
pub const DEFAULT_MAX_CONCURRENCY: usize = 32;
pub const DEFAULT_MAX_FETCH_TIMEOUT_MS: u64 = 60_000;

/// Site-level knobs the dispatcher reads once per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Honor every revision specifier on a repository, not just the first.
    pub search_multiple_revisions_per_repository: bool,
    /// Maximum number of distinct repositories sent to the unindexed searcher.
    pub max_unindexed_repos: usize,
    /// Maximum number of backend calls in flight for one search.
    pub max_concurrency: usize,
    /// Upper bound applied to the per-unit fetch timeout.
    pub max_fetch_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            search_multiple_revisions_per_repository: false,
            max_unindexed_repos: DEFAULT_MAX_UNINDEXED_REPOS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_fetch_timeout_ms: DEFAULT_MAX_FETCH_TIMEOUT_MS,
        }
    }
}

impl DispatchConfig {
    pub fn max_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.max_fetch_timeout_ms)
    }

    /// Concurrency degree, never zero.
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

/// Supplies the configuration snapshot used by a single search call.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> DispatchConfig;
}

impl ConfigSource for DispatchConfig {
    fn snapshot(&self) -> DispatchConfig {
        self.clone()
    }
}

impl ConfigSource for Arc<RwLock<DispatchConfig>> {
    fn snapshot(&self) -> DispatchConfig {
        match self.read() {
            Ok(guard) => guard.clone(),
            // A writer panicked mid-update; the last value is still usable.
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("searchdispatch.toml")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<DispatchConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: DispatchConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

/// Apply `SEARCHDISPATCH_*` environment overrides on top of `base`.
pub fn apply_env_overrides(mut base: DispatchConfig) -> DispatchConfig {
    if let Ok(v) = std::env::var("SEARCHDISPATCH_MULTIPLE_REVISIONS") {
        base.search_multiple_revisions_per_repository = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Some(v) = env_parse::<usize>("SEARCHDISPATCH_MAX_UNINDEXED_REPOS") {
        base.max_unindexed_repos = v;
    }
    if let Some(v) = env_parse::<usize>("SEARCHDISPATCH_MAX_CONCURRENCY") {
        base.max_concurrency = v;
    }
    if let Some(v) = env_parse::<u64>("SEARCHDISPATCH_MAX_FETCH_TIMEOUT_MS") {
        base.max_fetch_timeout_ms = v;
    }
    base
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}

/// Defaults <- config file <- environment.
pub fn load_effective_config(path: Option<&Path>) -> anyhow::Result<DispatchConfig> {
    let base = load_config(path)?.unwrap_or_default();
    Ok(apply_env_overrides(base))
}
