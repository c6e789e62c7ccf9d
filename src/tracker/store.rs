//! Whole-document persistence for the tracker.
//!
//! Loads never fail: a missing, unreadable, or malformed document is an empty
//! snapshot. Writes replace the document in one rename so a reader never sees
//! a partial file.
use super::types::{ItemEntry, SessionRecord, StageRecord, DISPLAY_FIELDS_KEY, UPDATED_AT_KEY};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

pub const MANIFEST_VERSION: u32 = 1;

/// On-disk shape of the tracking document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// `{item_key: {stage_name: record, display_fields, updated_at}}`.
    #[default]
    Flat,
    /// `{version, episodes: [entry], sessions: [session]}`.
    Manifest,
}

/// In-memory copy of the whole document for one load-mutate-save cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub items: BTreeMap<String, ItemEntry>,
    pub sessions: Vec<SessionRecord>,
}

#[derive(Deserialize, Serialize)]
struct ManifestDocument {
    version: u32,
    #[serde(default)]
    episodes: Vec<ItemEntry>,
    #[serde(default)]
    sessions: Vec<SessionRecord>,
}

pub fn load_snapshot(path: &Path, layout: Layout) -> Snapshot {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Snapshot::default(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "status file unreadable; starting empty");
            return Snapshot::default();
        }
    };
    match parse_snapshot(&bytes, layout) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "status file malformed; starting empty");
            Snapshot::default()
        }
    }
}

fn parse_snapshot(bytes: &[u8], layout: Layout) -> Result<Snapshot> {
    match layout {
        Layout::Flat => {
            let document: BTreeMap<String, Map<String, Value>> =
                serde_json::from_slice(bytes).context("parse status JSON")?;
            let items = document
                .into_iter()
                .map(|(key, fields)| -> Result<(String, ItemEntry)> {
                    let entry = flat_entry_from_fields(&key, fields)
                        .with_context(|| format!("parse status entry {key:?}"))?;
                    Ok((key, entry))
                })
                .collect::<Result<_>>()?;
            Ok(Snapshot {
                items,
                sessions: Vec::new(),
            })
        }
        Layout::Manifest => {
            let document: ManifestDocument =
                serde_json::from_slice(bytes).context("parse manifest JSON")?;
            if document.version != MANIFEST_VERSION {
                return Err(anyhow!(
                    "unsupported manifest version {}",
                    document.version
                ));
            }
            let items = document
                .episodes
                .into_iter()
                .filter(|entry| !entry.key.is_empty())
                .map(|entry| (entry.key.clone(), entry))
                .collect();
            Ok(Snapshot {
                items,
                sessions: document.sessions,
            })
        }
    }
}

pub fn render_snapshot(snapshot: &Snapshot, layout: Layout) -> Result<String> {
    let text = match layout {
        Layout::Flat => {
            let document = snapshot
                .items
                .iter()
                .map(|(key, entry)| -> Result<(String, Value)> {
                    Ok((key.clone(), flat_entry_fields(entry)?))
                })
                .collect::<Result<Map<String, Value>>>()?;
            serde_json::to_string_pretty(&document)
        }
        Layout::Manifest => serde_json::to_string_pretty(&ManifestDocument {
            version: MANIFEST_VERSION,
            episodes: snapshot.items.values().cloned().collect(),
            sessions: snapshot.sessions.clone(),
        }),
    };
    text.context("serialize status document")
}

/// One item object of the flat layout: stage names beside the reserved keys.
fn flat_entry_fields(entry: &ItemEntry) -> Result<Value> {
    let mut fields = Map::new();
    for (stage, record) in &entry.stages {
        let record = serde_json::to_value(record)
            .with_context(|| format!("serialize stage {stage:?}"))?;
        fields.insert(stage.clone(), record);
    }
    if !entry.display_fields.is_empty() {
        fields.insert(
            DISPLAY_FIELDS_KEY.to_string(),
            serde_json::to_value(&entry.display_fields).context("serialize display fields")?,
        );
    }
    fields.insert(
        UPDATED_AT_KEY.to_string(),
        Value::String(entry.updated_at.clone()),
    );
    Ok(Value::Object(fields))
}

fn flat_entry_from_fields(key: &str, mut fields: Map<String, Value>) -> Result<ItemEntry> {
    let mut entry = ItemEntry::new(key, "");
    if let Some(display) = fields.remove(DISPLAY_FIELDS_KEY) {
        entry.display_fields = serde_json::from_value(display).context("parse display fields")?;
    }
    if let Some(updated_at) = fields.remove(UPDATED_AT_KEY) {
        entry.updated_at = serde_json::from_value(updated_at).context("parse updated_at")?;
    }
    for (stage, record) in fields {
        let record: StageRecord = serde_json::from_value(record)
            .with_context(|| format!("parse stage {stage:?}"))?;
        entry.stages.insert(stage, record);
    }
    Ok(entry)
}

/// Replace the document at `path` with `snapshot`.
pub fn write_snapshot(path: &Path, layout: Layout, snapshot: &Snapshot) -> Result<()> {
    let text = render_snapshot(snapshot, layout)?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(text.as_bytes())
        .with_context(|| format!("write {}", tmp.path().display()))?;
    tmp.write_all(b"\n")
        .with_context(|| format!("write {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
