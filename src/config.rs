//! Runner configuration.
//!
//! Settings come from an optional JSON file and are then overridden by CLI
//! flags. Every field has a default, so a partial file is valid.
use crate::processor::BatchConfig;
use crate::retry::{Backoff, RetryPolicy};
use crate::tracker::{Layout, StageRegistry, DEFAULT_STAGES, DEFAULT_TERMINAL_STAGE};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const CONFIG_ENV: &str = "STAGERUN_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "stagerun.json";
pub const DEFAULT_STATUS_FILE: &str = "status.json";
const DEFAULT_CACHE_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub schema_version: u32,
    pub status_path: PathBuf,
    pub layout: Layout,
    pub stages: Vec<String>,
    pub terminal_stage: String,
    pub worker_count: usize,
    pub continue_on_error: bool,
    pub max_retries: u32,
    pub retry_delay_seconds: f64,
    /// Replaces the fixed `retry_delay_seconds` policy when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
    pub cache_capacity: usize,
    /// Work command per stage name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub commands: BTreeMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            status_path: PathBuf::from(DEFAULT_STATUS_FILE),
            layout: Layout::default(),
            stages: DEFAULT_STAGES.iter().map(|stage| stage.to_string()).collect(),
            terminal_stage: DEFAULT_TERMINAL_STAGE.to_string(),
            worker_count: 2,
            continue_on_error: true,
            max_retries: 2,
            retry_delay_seconds: 1.0,
            backoff: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            commands: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    pub fn registry(&self) -> Result<StageRegistry> {
        StageRegistry::new(self.stages.clone(), &self.terminal_stage)
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff.clone().unwrap_or(Backoff::Fixed {
            delay_seconds: self.retry_delay_seconds,
        })
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            worker_count: self.worker_count,
            continue_on_error: self.continue_on_error,
            retry: RetryPolicy::new(self.max_retries, self.backoff()),
        }
    }

    pub fn command_for(&self, stage: &str) -> Option<&str> {
        self.commands
            .get(stage)
            .map(String::as_str)
            .map(str::trim)
            .filter(|command| !command.is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: RunnerConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &RunnerConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(config).context("serialize config")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Locate the config file: explicit flag, then `STAGERUN_CONFIG`, then
/// `./stagerun.json`, then the user config dir. Only the first two may name a
/// file that does not exist (which is an error at load time).
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("stagerun").join("config.json"))
        .filter(|path| path.is_file())
}

/// Load the resolved config, or defaults when no file is found.
pub fn load_resolved(explicit: Option<&Path>) -> Result<(RunnerConfig, Option<PathBuf>)> {
    match resolve_config_path(explicit) {
        Some(path) => {
            let config = load_config(&path)?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok((config, Some(path)))
        }
        None => Ok((RunnerConfig::default(), None)),
    }
}

pub fn validate_config(config: &RunnerConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    if config.status_path.as_os_str().is_empty() {
        return Err(anyhow!("status_path must be non-empty"));
    }
    if config.cache_capacity == 0 {
        return Err(anyhow!("cache_capacity must be >= 1"));
    }
    let registry = config.registry()?;
    for stage in config.commands.keys() {
        registry
            .ensure(stage)
            .context("commands must name configured stages")?;
    }
    config.batch_config().validate()?;
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
