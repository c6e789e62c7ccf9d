use super::StageTracker;
use crate::item::WorkItem;
use crate::processor::{BatchObserver, Completion};
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;

/// Records one stage's lifecycle in a tracker as the processor runs items.
pub struct StageObserver<'a> {
    tracker: &'a StageTracker,
    stage: String,
    model: Option<String>,
}

impl<'a> StageObserver<'a> {
    pub fn new(tracker: &'a StageTracker, stage: &str) -> Result<Self> {
        tracker.registry().ensure(stage)?;
        Ok(Self {
            tracker,
            stage: stage.to_string(),
            model: None,
        })
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    fn log_rejected(&self, key: &str, result: Result<()>) {
        if let Err(err) = result {
            tracing::warn!(key, stage = %self.stage, error = %format!("{err:#}"), "stage update rejected");
        }
    }
}

impl BatchObserver for StageObserver<'_> {
    fn on_start(&self, item: &WorkItem) {
        self.tracker.register_item(&item.key, &item.display_fields());
        let result =
            self.tracker
                .start_stage(&item.key, &self.stage, self.model.as_deref(), None);
        self.log_rejected(&item.key, result);
    }

    fn on_retry(&self, item: &WorkItem, retry: u32, error: &str) {
        let status = format!("Retry {retry}: {error}");
        let result = self
            .tracker
            .update_progress(&item.key, &self.stage, 0.0, Some(&status))
            .map(|_| ());
        self.log_rejected(&item.key, result);
    }

    fn on_success(&self, completion: &Completion<'_>) {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "duration_seconds".to_string(),
            Value::from(completion.duration.as_secs_f64()),
        );
        metadata.insert("retries".to_string(), Value::from(completion.retries));
        let result = self.tracker.complete_stage(
            &completion.item.key,
            &self.stage,
            None,
            Some(&metadata),
        );
        self.log_rejected(&completion.item.key, result);
    }

    fn on_failure(&self, completion: &Completion<'_>) {
        let error = completion.error.unwrap_or("unknown error");
        let result = self
            .tracker
            .fail_stage(&completion.item.key, &self.stage, error);
        self.log_rejected(&completion.item.key, result);
    }
}
