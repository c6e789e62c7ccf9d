//! Persisted stage-tracking types.
//!
//! These mirror the status and manifest JSON documents field for field.
use anyhow::{anyhow, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Per-stage state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl StageState {
    /// Return the stable string identifier used in JSON and CSV output.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::NotStarted => "not_started",
            StageState::InProgress => "in_progress",
            StageState::Completed => "completed",
            StageState::Failed => "failed",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct StageRecord {
    #[serde(default)]
    pub state: StageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub status_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// All tracked stages for one work item.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ItemEntry {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub display_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub stages: BTreeMap<String, StageRecord>,
    #[serde(default)]
    pub updated_at: String,
}

impl ItemEntry {
    pub fn new(key: &str, now: &str) -> Self {
        Self {
            key: key.to_string(),
            display_fields: BTreeMap::new(),
            stages: BTreeMap::new(),
            updated_at: now.to_string(),
        }
    }

    pub fn stage_state(&self, stage: &str) -> Option<StageState> {
        self.stages.get(stage).map(|record| record.state)
    }

    pub fn display_field(&self, name: &str) -> Option<&str> {
        self.display_fields.get(name).map(String::as_str)
    }
}

/// One batch run, recorded in the manifest layout.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub started_at: String,
    pub finished_at: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Known stage names in pipeline order, plus the stage that marks an item done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRegistry {
    stages: Vec<String>,
    terminal: String,
}

pub const DEFAULT_STAGES: [&str; 5] = ["transcode", "transcribe", "diarize", "analyze", "export"];
pub const DEFAULT_TERMINAL_STAGE: &str = "export";

/// Keys an item object in the flat status file uses besides stage names.
pub const DISPLAY_FIELDS_KEY: &str = "display_fields";
pub const UPDATED_AT_KEY: &str = "updated_at";
pub const RESERVED_ENTRY_KEYS: [&str; 2] = [DISPLAY_FIELDS_KEY, UPDATED_AT_KEY];

impl Default for StageRegistry {
    fn default() -> Self {
        Self {
            stages: DEFAULT_STAGES.iter().map(|stage| stage.to_string()).collect(),
            terminal: DEFAULT_TERMINAL_STAGE.to_string(),
        }
    }
}

impl StageRegistry {
    pub fn new(stages: Vec<String>, terminal: &str) -> Result<Self> {
        if stages.is_empty() {
            return Err(anyhow!("stage list must be non-empty"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for stage in &stages {
            if stage.trim().is_empty() {
                return Err(anyhow!("stage names must be non-empty"));
            }
            if RESERVED_ENTRY_KEYS.contains(&stage.as_str()) {
                return Err(anyhow!("stage name {stage:?} is reserved"));
            }
            if !seen.insert(stage.as_str()) {
                return Err(anyhow!("duplicate stage name {stage:?}"));
            }
        }
        if !seen.contains(terminal) {
            return Err(anyhow!(
                "terminal stage {terminal:?} is not one of the configured stages"
            ));
        }
        Ok(Self {
            stages,
            terminal: terminal.to_string(),
        })
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn terminal(&self) -> &str {
        &self.terminal
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.stages.iter().any(|known| known == stage)
    }

    /// Reject stage names outside the registry.
    pub fn ensure(&self, stage: &str) -> Result<()> {
        if self.contains(stage) {
            return Ok(());
        }
        Err(anyhow!(
            "unknown stage {stage:?} (known: {})",
            self.stages.join(", ")
        ))
    }
}

/// Current UTC time as a fixed-width RFC 3339 string.
///
/// Fixed precision keeps lexicographic and chronological order identical.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
