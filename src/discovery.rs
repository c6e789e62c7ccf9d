//! Item discovery seam.
//!
//! Discovery is owned by whatever produces work items; the batch core only
//! needs the `ItemSource` contract. The JSON-file source here is what the CLI
//! uses, and it derives each item's processing status from the tracker.
use crate::item::{WorkItem, PUBLISHED_FIELD};
use crate::tracker::{ItemEntry, StageState, StageTracker};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How far through the pipeline an item has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    New,
    Partial,
    Complete,
}

impl ProcessingStatus {
    pub fn from_entry(entry: Option<&ItemEntry>, terminal_stage: &str) -> Self {
        match entry {
            None => ProcessingStatus::New,
            Some(entry) if entry.stage_state(terminal_stage) == Some(StageState::Completed) => {
                ProcessingStatus::Complete
            }
            Some(entry) if entry.stages.is_empty() => ProcessingStatus::New,
            Some(_) => ProcessingStatus::Partial,
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(ProcessingStatus::New),
            "partial" => Ok(ProcessingStatus::Partial),
            "complete" => Ok(ProcessingStatus::Complete),
            other => Err(format!(
                "unknown processing status {other:?} (use new, partial, or complete)"
            )),
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStatus::New => f.write_str("new"),
            ProcessingStatus::Partial => f.write_str("partial"),
            ProcessingStatus::Complete => f.write_str("complete"),
        }
    }
}

/// Selection criteria; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub name: Option<String>,
    pub published_from: Option<NaiveDate>,
    pub published_to: Option<NaiveDate>,
    pub min_duration_seconds: Option<f64>,
    pub max_duration_seconds: Option<f64>,
    pub status: Option<ProcessingStatus>,
}

impl Criteria {
    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.published_from, self.published_to) {
            if from > to {
                return Err(anyhow!("date range is empty: {from} is after {to}"));
            }
        }
        if let (Some(min), Some(max)) = (self.min_duration_seconds, self.max_duration_seconds) {
            if min > max {
                return Err(anyhow!("duration range is empty: {min} > {max}"));
            }
        }
        Ok(())
    }

    /// Match every criterion except processing status.
    pub fn matches(&self, item: &WorkItem) -> bool {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            let needle = name.to_lowercase();
            let hit = item.title().to_lowercase().contains(&needle)
                || item.key.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        if self.published_from.is_some() || self.published_to.is_some() {
            let Some(published) = published_date(item) else {
                return false;
            };
            if self.published_from.is_some_and(|from| published < from)
                || self.published_to.is_some_and(|to| published > to)
            {
                return false;
            }
        }
        if self.min_duration_seconds.is_some() || self.max_duration_seconds.is_some() {
            let Some(duration) = item.duration_seconds() else {
                return false;
            };
            if self.min_duration_seconds.is_some_and(|min| duration < min)
                || self.max_duration_seconds.is_some_and(|max| duration > max)
            {
                return false;
            }
        }
        true
    }
}

fn published_date(item: &WorkItem) -> Option<NaiveDate> {
    let raw = item.str_field(PUBLISHED_FIELD)?;
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

pub trait ItemSource {
    fn discover(&self, criteria: &Criteria) -> Result<Vec<WorkItem>>;
}

/// Items listed in a JSON array file, with status derived from a tracker.
pub struct JsonItemSource<'a> {
    path: PathBuf,
    tracker: Option<&'a StageTracker>,
}

impl<'a> JsonItemSource<'a> {
    pub fn new(path: impl Into<PathBuf>, tracker: Option<&'a StageTracker>) -> Self {
        Self {
            path: path.into(),
            tracker,
        }
    }
}

impl ItemSource for JsonItemSource<'_> {
    fn discover(&self, criteria: &Criteria) -> Result<Vec<WorkItem>> {
        criteria.validate()?;
        let items = load_items(&self.path)?;
        let listed = items.len();
        let entries: BTreeMap<String, ItemEntry> = match (criteria.status, self.tracker) {
            (Some(_), Some(tracker)) => tracker.snapshot().items,
            (Some(_), None) => {
                return Err(anyhow!("status filter requires a status tracker"));
            }
            _ => BTreeMap::new(),
        };
        let terminal = self
            .tracker
            .map(|tracker| tracker.registry().terminal().to_string())
            .unwrap_or_default();
        let selected: Vec<WorkItem> = items
            .into_iter()
            .filter(|item| criteria.matches(item))
            .filter(|item| match criteria.status {
                Some(wanted) => {
                    ProcessingStatus::from_entry(entries.get(&item.key), &terminal) == wanted
                }
                None => true,
            })
            .collect();
        tracing::debug!(path = %self.path.display(), listed, selected = selected.len(), "discovered items");
        Ok(selected)
    }
}

pub fn load_items(path: &Path) -> Result<Vec<WorkItem>> {
    let bytes = fs::read(path).with_context(|| format!("read items {}", path.display()))?;
    let items: Vec<WorkItem> = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse items JSON {}", path.display()))?;
    if let Some(blank) = items.iter().position(|item| item.key.trim().is_empty()) {
        return Err(anyhow!("item at index {blank} has an empty key"));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{DURATION_FIELD, TITLE_FIELD};
    use crate::tracker::{Layout, StageRegistry};
    use tempfile::TempDir;

    fn episode(key: &str, title: &str, published: &str, duration: f64) -> WorkItem {
        WorkItem::new(key)
            .with_field(TITLE_FIELD, title)
            .with_field(PUBLISHED_FIELD, published)
            .with_field(DURATION_FIELD, duration)
    }

    fn write_items(dir: &TempDir, items: &[WorkItem]) -> PathBuf {
        let path = dir.path().join("items.json");
        fs::write(&path, serde_json::to_vec_pretty(items).expect("serialize items"))
            .expect("write items");
        path
    }

    fn date(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").expect("valid date")
    }

    fn keys(items: &[WorkItem]) -> Vec<&str> {
        items.iter().map(|item| item.key.as_str()).collect()
    }

    #[test]
    fn criteria_filter_by_name_date_and_duration() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_items(
            &dir,
            &[
                episode("a", "Rust Weekly 1", "2024-01-05", 1200.0),
                episode("b", "Rust Weekly 2", "2024-02-05T08:00:00Z", 4000.0),
                episode("c", "Gardening", "2024-01-20", 1500.0),
            ],
        );
        let source = JsonItemSource::new(&path, None);

        let by_name = source
            .discover(&Criteria {
                name: Some("rust".to_string()),
                ..Criteria::default()
            })
            .expect("discover");
        assert_eq!(keys(&by_name), vec!["a", "b"]);

        let by_date = source
            .discover(&Criteria {
                published_from: Some(date("2024-01-05")),
                published_to: Some(date("2024-01-31")),
                ..Criteria::default()
            })
            .expect("discover");
        assert_eq!(keys(&by_date), vec!["a", "c"]);

        let by_duration = source
            .discover(&Criteria {
                min_duration_seconds: Some(1300.0),
                max_duration_seconds: Some(5000.0),
                ..Criteria::default()
            })
            .expect("discover");
        assert_eq!(keys(&by_duration), vec!["b", "c"]);
    }

    #[test]
    fn status_filter_uses_tracker_state() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_items(
            &dir,
            &[
                WorkItem::new("fresh"),
                WorkItem::new("midway"),
                WorkItem::new("finished"),
            ],
        );
        let tracker = StageTracker::new(
            dir.path().join("status.json"),
            StageRegistry::default(),
            Layout::Flat,
        );
        tracker
            .complete_stage("midway", "transcode", None, None)
            .expect("complete");
        tracker
            .complete_stage("finished", "export", None, None)
            .expect("complete");
        let source = JsonItemSource::new(&path, Some(&tracker));

        for (status, expected) in [
            (ProcessingStatus::New, "fresh"),
            (ProcessingStatus::Partial, "midway"),
            (ProcessingStatus::Complete, "finished"),
        ] {
            let found = source
                .discover(&Criteria {
                    status: Some(status),
                    ..Criteria::default()
                })
                .expect("discover");
            assert_eq!(keys(&found), vec![expected], "status {status}");
        }
    }

    #[test]
    fn inverted_ranges_and_blank_keys_are_rejected() {
        let criteria = Criteria {
            published_from: Some(date("2024-02-01")),
            published_to: Some(date("2024-01-01")),
            ..Criteria::default()
        };
        assert!(criteria.validate().is_err());

        let dir = TempDir::new().expect("tempdir");
        let path = write_items(&dir, &[WorkItem::new(" ")]);
        assert!(load_items(&path).is_err());
    }
}
