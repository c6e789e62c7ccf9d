//! Durable per-item, per-stage progress tracking.
//!
//! The file on disk is the only source of truth. Every mutating call loads the
//! whole document, edits it in memory, and rewrites it while holding the
//! tracker's lock, so concurrent workers updating different items never drop
//! each other's writes. Persistence problems are logged and swallowed: the
//! tracker may fall behind reality but never fails the step that called it.
mod export;
mod observer;
mod store;
mod types;

pub use export::{render_csv, ExportFormat};
pub use observer::StageObserver;
pub use store::{Layout, Snapshot, MANIFEST_VERSION};
pub use types::{
    now_timestamp, ItemEntry, SessionRecord, StageRecord, StageRegistry, StageState,
    DEFAULT_STAGES, DEFAULT_TERMINAL_STAGE, DISPLAY_FIELDS_KEY, RESERVED_ENTRY_KEYS,
    UPDATED_AT_KEY,
};

use crate::item::SHOW_FIELD;
use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const STATUS_STARTING: &str = "Starting...";
pub const STATUS_COMPLETED: &str = "Completed";

pub struct StageTracker {
    path: PathBuf,
    layout: Layout,
    registry: StageRegistry,
    lock: Mutex<()>,
}

impl StageTracker {
    pub fn new(path: impl Into<PathBuf>, registry: StageRegistry, layout: Layout) -> Self {
        Self {
            path: path.into(),
            layout,
            registry,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Mark `stage` in progress, creating the item entry if needed.
    pub fn start_stage(
        &self,
        key: &str,
        stage: &str,
        model: Option<&str>,
        metadata: Option<&BTreeMap<String, Value>>,
    ) -> Result<()> {
        self.registry.ensure(stage)?;
        self.mutate(|snapshot| {
            let now = now_timestamp();
            let entry = entry_mut(snapshot, key, &now);
            let record = entry.stages.entry(stage.to_string()).or_default();
            if record.state == StageState::Completed {
                tracing::debug!(key, stage, "restarting completed stage");
            }
            record.state = StageState::InProgress;
            record.started_at = Some(now.clone());
            record.completed_at = None;
            record.progress = 0.0;
            record.status_message = STATUS_STARTING.to_string();
            record.error = None;
            if let Some(model) = model {
                record.model = Some(model.to_string());
            }
            if let Some(metadata) = metadata {
                record.metadata.extend(metadata.clone());
            }
            entry.updated_at = now;
            Some(())
        });
        Ok(())
    }

    /// Update progress of an in-progress stage; never creates anything.
    ///
    /// Returns whether a record was updated.
    pub fn update_progress(
        &self,
        key: &str,
        stage: &str,
        progress: f64,
        status: Option<&str>,
    ) -> Result<bool> {
        self.registry.ensure(stage)?;
        let applied = self.mutate(|snapshot| {
            let entry = snapshot.items.get_mut(key)?;
            let record = entry.stages.get_mut(stage)?;
            if record.state != StageState::InProgress {
                tracing::debug!(key, stage, state = %record.state, "ignoring progress for inactive stage");
                return None;
            }
            record.progress = if progress.is_nan() {
                0.0
            } else {
                progress.clamp(0.0, 1.0)
            };
            if let Some(status) = status {
                record.status_message = status.to_string();
            }
            entry.updated_at = now_timestamp();
            Some(())
        });
        Ok(applied.is_some())
    }

    /// Mark `stage` completed; records it directly completed if it never started.
    pub fn complete_stage(
        &self,
        key: &str,
        stage: &str,
        files: Option<&[String]>,
        metadata: Option<&BTreeMap<String, Value>>,
    ) -> Result<()> {
        self.registry.ensure(stage)?;
        self.mutate(|snapshot| {
            let now = now_timestamp();
            let entry = entry_mut(snapshot, key, &now);
            let record = entry.stages.entry(stage.to_string()).or_default();
            record.state = StageState::Completed;
            record.completed_at = Some(now.clone());
            record.progress = 1.0;
            record.status_message = STATUS_COMPLETED.to_string();
            record.error = None;
            if let Some(files) = files {
                record.output_files = files.to_vec();
            }
            if let Some(metadata) = metadata {
                record.metadata.extend(metadata.clone());
            }
            entry.updated_at = now;
            Some(())
        });
        Ok(())
    }

    /// Mark `stage` failed with `error`.
    pub fn fail_stage(&self, key: &str, stage: &str, error: &str) -> Result<()> {
        self.registry.ensure(stage)?;
        self.mutate(|snapshot| {
            let now = now_timestamp();
            let entry = entry_mut(snapshot, key, &now);
            let record = entry.stages.entry(stage.to_string()).or_default();
            record.state = StageState::Failed;
            record.error = Some(error.to_string());
            record.status_message = format!("Failed: {error}");
            entry.updated_at = now;
            Some(())
        });
        Ok(())
    }

    /// Merge display fields (title, show) into the item's entry.
    pub fn register_item(&self, key: &str, display_fields: &BTreeMap<String, String>) {
        self.mutate(|snapshot| {
            let created = !snapshot.items.contains_key(key);
            let now = now_timestamp();
            let entry = entry_mut(snapshot, key, &now);
            let changed = display_fields
                .iter()
                .any(|(name, value)| entry.display_fields.get(name) != Some(value));
            if !created && !changed {
                return None;
            }
            entry.display_fields.extend(display_fields.clone());
            entry.updated_at = now;
            Some(())
        });
    }

    pub fn get_status(&self, key: &str) -> Option<ItemEntry> {
        self.read().items.remove(key)
    }

    /// All entries, most recently updated first, optionally limited to one show.
    pub fn get_all(&self, show_filter: Option<&str>) -> Vec<ItemEntry> {
        let needle = show_filter
            .map(str::trim)
            .filter(|needle| !needle.is_empty())
            .map(str::to_lowercase);
        let mut entries: Vec<ItemEntry> = self
            .read()
            .items
            .into_values()
            .filter(|entry| match &needle {
                Some(needle) => entry
                    .display_field(SHOW_FIELD)
                    .is_some_and(|show| show.to_lowercase().contains(needle.as_str())),
                None => true,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        entries
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.read().sessions
    }

    pub fn snapshot(&self) -> Snapshot {
        self.read()
    }

    /// Write the current snapshot to `path` as JSON or CSV.
    pub fn export(&self, path: &Path, format: ExportFormat) -> Result<()> {
        let snapshot = self.read();
        export::write_export(path, format, &snapshot, &self.registry)?;
        tracing::info!(path = %path.display(), %format, items = snapshot.items.len(), "exported status");
        Ok(())
    }

    /// Drop every item whose terminal stage is completed.
    pub fn clear_completed(&self) -> usize {
        let terminal = self.registry.terminal();
        self.mutate(|snapshot| {
            let before = snapshot.items.len();
            snapshot
                .items
                .retain(|_, entry| entry.stage_state(terminal) != Some(StageState::Completed));
            let removed = before - snapshot.items.len();
            (removed > 0).then_some(removed)
        })
        .unwrap_or(0)
    }

    /// Append a batch run to the manifest. Flat status files keep no sessions.
    pub fn record_session(&self, session: &SessionRecord) {
        if self.layout != Layout::Manifest {
            tracing::debug!(id = %session.id, "flat layout keeps no session history");
            return;
        }
        self.mutate(|snapshot| {
            snapshot.sessions.push(session.clone());
            Some(())
        });
    }

    fn read(&self) -> Snapshot {
        let _guard = self.lock.lock();
        store::load_snapshot(&self.path, self.layout)
    }

    /// One locked load-mutate-save cycle. `op` returns `None` when it changed
    /// nothing, which skips the rewrite.
    fn mutate<R>(&self, op: impl FnOnce(&mut Snapshot) -> Option<R>) -> Option<R> {
        let _guard = self.lock.lock();
        let mut snapshot = store::load_snapshot(&self.path, self.layout);
        let outcome = op(&mut snapshot)?;
        if let Err(err) = store::write_snapshot(&self.path, self.layout, &snapshot) {
            tracing::warn!(
                path = %self.path.display(),
                error = %format!("{err:#}"),
                "failed to save status; tracking may lag behind"
            );
        }
        Some(outcome)
    }
}

fn entry_mut<'a>(snapshot: &'a mut Snapshot, key: &str, now: &str) -> &'a mut ItemEntry {
    snapshot
        .items
        .entry(key.to_string())
        .or_insert_with(|| ItemEntry::new(key, now))
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
