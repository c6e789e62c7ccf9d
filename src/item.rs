//! Work items handed to the batch processor.
//!
//! The processor treats an item as an opaque key plus payload. A few payload
//! fields have well-known names so discovery, tracking, and export can agree on
//! them without the processor caring.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub const TITLE_FIELD: &str = "title";
pub const SHOW_FIELD: &str = "show";
pub const PUBLISHED_FIELD: &str = "published";
pub const DURATION_FIELD: &str = "duration_seconds";
pub const PATH_FIELD: &str = "path";

/// One unit of batch work, identified by a stable key.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkItem {
    pub key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub payload: BTreeMap<String, Value>,
}

impl WorkItem {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(name.to_string(), value.into());
        self
    }

    /// Return a payload field when it is a non-empty string.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.payload
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn title(&self) -> &str {
        self.str_field(TITLE_FIELD).unwrap_or(&self.key)
    }

    pub fn show(&self) -> Option<&str> {
        self.str_field(SHOW_FIELD)
    }

    pub fn path(&self) -> Option<&Path> {
        self.str_field(PATH_FIELD).map(Path::new)
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.payload.get(DURATION_FIELD).and_then(Value::as_f64)
    }

    /// Fields worth persisting next to the item's stage records.
    pub fn display_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        for name in [TITLE_FIELD, SHOW_FIELD] {
            if let Some(value) = self.str_field(name) {
                fields.insert(name.to_string(), value.to_string());
            }
        }
        fields
    }
}

/// Keep only items whose referenced resource path currently exists.
///
/// Items without a `path` payload field reference nothing and are dropped.
pub fn filter_to_existing(items: Vec<WorkItem>) -> Vec<WorkItem> {
    items
        .into_iter()
        .filter(|item| match item.path() {
            Some(path) => path.exists(),
            None => {
                tracing::debug!(key = %item.key, "item has no path; dropping");
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_falls_back_to_key_and_ignores_blank_values() {
        let item = WorkItem::new("ep-1").with_field(TITLE_FIELD, "   ");
        assert_eq!(item.title(), "ep-1");
        let item = item.with_field(TITLE_FIELD, "Pilot");
        assert_eq!(item.title(), "Pilot");
    }

    #[test]
    fn display_fields_only_carry_title_and_show() {
        let item = WorkItem::new("ep-1")
            .with_field(TITLE_FIELD, "Pilot")
            .with_field(SHOW_FIELD, "Night Shift")
            .with_field(DURATION_FIELD, 1800.0);
        let fields = item.display_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get(SHOW_FIELD).map(String::as_str), Some("Night Shift"));
    }

    #[test]
    fn filter_to_existing_keeps_items_with_present_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let present = dir.path().join("a.mp3");
        std::fs::write(&present, b"audio").expect("write audio");
        let missing = dir.path().join("b.mp3");

        let items = vec![
            WorkItem::new("a").with_field(PATH_FIELD, present.display().to_string()),
            WorkItem::new("b").with_field(PATH_FIELD, missing.display().to_string()),
            WorkItem::new("c"),
        ];
        let kept = filter_to_existing(items);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].key, "a");
    }
}
