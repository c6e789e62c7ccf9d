//! Bounded worker pool that runs a work function over independent items.
//!
//! Items are queued up front and a fixed number of scoped worker threads drain
//! the queue, retrying each item on the worker that picked it up. Results are
//! collected in completion order. Stop-on-error closes intake with a shared
//! flag that workers check before starting the next item; calls already in
//! flight always run to completion.
use crate::item::WorkItem;
use crate::retry::{FailureKind, RetryPolicy};
use anyhow::{anyhow, Result};
use serde::{Serialize, Serializer};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Pool and failure policy for one processor.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub worker_count: usize,
    pub continue_on_error: bool,
    pub retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            continue_on_error: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(anyhow!("worker_count must be >= 1"));
        }
        self.retry.backoff.validate()
    }
}

/// Outcome of one item. Exactly one is produced for every item that started.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<T> {
    pub item: WorkItem,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempt_errors: Vec<String>,
    /// Serialized as fractional seconds.
    #[serde(serialize_with = "serialize_seconds")]
    pub duration: Duration,
    pub retries: u32,
}

fn serialize_seconds<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// What observers see when an item finishes.
#[derive(Debug, Clone, Copy)]
pub struct Completion<'a> {
    pub item: &'a WorkItem,
    pub duration: Duration,
    pub retries: u32,
    pub error: Option<&'a str>,
}

/// Hook points invoked from worker threads.
///
/// Observers must not assume any ordering across items; calls for a single
/// item always arrive as start, zero or more retries, then success or failure.
pub trait BatchObserver: Sync {
    fn on_start(&self, _item: &WorkItem) {}
    fn on_retry(&self, _item: &WorkItem, _retry: u32, _error: &str) {}
    fn on_success(&self, _completion: &Completion<'_>) {}
    fn on_failure(&self, _completion: &Completion<'_>) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl BatchObserver for NoopObserver {}

impl<O: BatchObserver + ?Sized> BatchObserver for &O {
    fn on_start(&self, item: &WorkItem) {
        (**self).on_start(item);
    }

    fn on_retry(&self, item: &WorkItem, retry: u32, error: &str) {
        (**self).on_retry(item, retry, error);
    }

    fn on_success(&self, completion: &Completion<'_>) {
        (**self).on_success(completion);
    }

    fn on_failure(&self, completion: &Completion<'_>) {
        (**self).on_failure(completion);
    }
}

impl<A: BatchObserver, B: BatchObserver> BatchObserver for (A, B) {
    fn on_start(&self, item: &WorkItem) {
        self.0.on_start(item);
        self.1.on_start(item);
    }

    fn on_retry(&self, item: &WorkItem, retry: u32, error: &str) {
        self.0.on_retry(item, retry, error);
        self.1.on_retry(item, retry, error);
    }

    fn on_success(&self, completion: &Completion<'_>) {
        self.0.on_success(completion);
        self.1.on_success(completion);
    }

    fn on_failure(&self, completion: &Completion<'_>) {
        self.0.on_failure(completion);
        self.1.on_failure(completion);
    }
}

pub struct BatchProcessor<O = NoopObserver> {
    config: BatchConfig,
    observer: O,
}

impl BatchProcessor<NoopObserver> {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            observer: NoopObserver,
        }
    }
}

impl<O: BatchObserver> BatchProcessor<O> {
    pub fn with_observer<P: BatchObserver>(self, observer: P) -> BatchProcessor<P> {
        BatchProcessor {
            config: self.config,
            observer,
        }
    }

    /// Run `work_fn` over `items` and return one result per started item.
    ///
    /// Never fails: work errors and panics become failed results.
    pub fn process<T, F>(&self, items: Vec<WorkItem>, work_fn: F, label: &str) -> Vec<BatchResult<T>>
    where
        T: Send,
        F: Fn(&WorkItem) -> Result<T> + Sync,
    {
        if items.is_empty() {
            tracing::debug!(label, "no items to process");
            return Vec::new();
        }
        let total = items.len();
        let worker_count = self.config.worker_count.clamp(1, total);
        let span = tracing::info_span!("batch", label, total, workers = worker_count);
        let _entered = span.enter();
        tracing::info!("batch started");

        let (task_tx, task_rx) = crossbeam_channel::bounded::<WorkItem>(total);
        for item in items {
            if task_tx.send(item).is_err() {
                break;
            }
        }
        drop(task_tx);

        let (result_tx, result_rx) = crossbeam_channel::unbounded::<BatchResult<T>>();
        let cancelled = AtomicBool::new(false);
        let mut results = Vec::with_capacity(total);

        std::thread::scope(|scope| {
            for worker_id in 0..worker_count {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let cancelled = &cancelled;
                let work_fn = &work_fn;
                let span = span.clone();
                scope.spawn(move || {
                    let _entered = span.enter();
                    for item in task_rx.iter() {
                        if cancelled.load(Ordering::SeqCst) {
                            break;
                        }
                        tracing::trace!(worker_id, key = %item.key, "picked up item");
                        let result = self.run_item(item, work_fn, cancelled);
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);
            results.extend(result_rx.iter());
        });

        let failed = results.iter().filter(|result| !result.success).count();
        let skipped = total - results.len();
        if skipped > 0 {
            tracing::warn!(skipped, "stopped after failure; remaining items were not started");
        }
        tracing::info!(
            completed = results.len(),
            failed,
            skipped,
            "batch finished"
        );
        results
    }

    fn run_item<T, F>(
        &self,
        item: WorkItem,
        work_fn: &F,
        cancelled: &AtomicBool,
    ) -> BatchResult<T>
    where
        F: Fn(&WorkItem) -> Result<T>,
    {
        self.observer.on_start(&item);
        let started = Instant::now();
        let retry = &self.config.retry;
        let outcome = retry.run(
            |_| call_guarded(work_fn, &item),
            |attempt, error| {
                tracing::debug!(
                    key = %item.key,
                    attempt,
                    max_retries = retry.max_retries,
                    error,
                    "retrying item"
                );
                self.observer.on_retry(&item, attempt, error);
            },
        );
        let duration = started.elapsed();
        let retries = outcome.failed_attempts();

        match outcome.result {
            Ok(value) => {
                self.observer.on_success(&Completion {
                    item: &item,
                    duration,
                    retries,
                    error: None,
                });
                BatchResult {
                    item,
                    success: true,
                    result: Some(value),
                    error: None,
                    failure_kind: None,
                    attempt_errors: outcome.attempt_errors,
                    duration,
                    retries,
                }
            }
            Err(failure) => {
                // Stop intake before any observer runs.
                if !self.config.continue_on_error {
                    cancelled.store(true, Ordering::SeqCst);
                }
                tracing::warn!(
                    key = %item.key,
                    retries,
                    kind = %failure.kind,
                    error = %failure.message,
                    "item failed"
                );
                self.observer.on_failure(&Completion {
                    item: &item,
                    duration,
                    retries,
                    error: Some(&failure.message),
                });
                BatchResult {
                    item,
                    success: false,
                    result: None,
                    error: Some(failure.message),
                    failure_kind: Some(failure.kind),
                    attempt_errors: outcome.attempt_errors,
                    duration,
                    retries,
                }
            }
        }
    }
}

fn call_guarded<T, F>(work_fn: &F, item: &WorkItem) -> Result<T>
where
    F: Fn(&WorkItem) -> Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| work_fn(item))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|text| text.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(anyhow!("work function panicked: {message}"))
        }
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
