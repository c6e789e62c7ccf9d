//! Run summary derived from batch results.
use crate::exit_code::{derive_exit_code, ExitCode};
use crate::processor::BatchResult;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub key: String,
    pub error: String,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub label: String,
    pub requested: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items never started because the run stopped on an earlier failure.
    pub skipped: usize,
    pub total_retries: u32,
    pub average_duration_seconds: f64,
    pub exit_code: ExitCode,
    pub failures: Vec<FailedItem>,
}

impl RunSummary {
    pub fn from_results<T>(label: &str, requested: usize, results: &[BatchResult<T>]) -> Self {
        let succeeded = results.iter().filter(|result| result.success).count();
        let total_seconds: f64 = results
            .iter()
            .map(|result| result.duration.as_secs_f64())
            .sum();
        let average_duration_seconds = if results.is_empty() {
            0.0
        } else {
            total_seconds / results.len() as f64
        };
        let failures = results
            .iter()
            .filter(|result| !result.success)
            .map(|result| FailedItem {
                key: result.item.key.clone(),
                error: result.error.clone().unwrap_or_default(),
                retries: result.retries,
            })
            .collect();
        Self {
            label: label.to_string(),
            requested,
            completed: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            skipped: requested.saturating_sub(results.len()),
            total_retries: results.iter().map(|result| result.retries).sum(),
            average_duration_seconds,
            exit_code: derive_exit_code(results),
            failures,
        }
    }

    pub fn render_text(&self) -> String {
        let mut lines = vec![format!(
            "{}: {} succeeded, {} failed, {} skipped (of {})",
            self.label, self.succeeded, self.failed, self.skipped, self.requested
        )];
        if self.completed > 0 {
            lines.push(format!(
                "average duration {:.2}s, {} retries",
                self.average_duration_seconds, self.total_retries
            ));
        }
        for failure in &self.failures {
            lines.push(format!("  failed {}: {}", failure.key, failure.error));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::WorkItem;
    use std::time::Duration;

    fn result(key: &str, error: Option<&str>, seconds: u64, retries: u32) -> BatchResult<()> {
        BatchResult {
            item: WorkItem::new(key),
            success: error.is_none(),
            result: None,
            error: error.map(str::to_string),
            failure_kind: None,
            attempt_errors: Vec::new(),
            duration: Duration::from_secs(seconds),
            retries,
        }
    }

    #[test]
    fn summary_counts_failures_skips_and_average_duration() {
        let results = vec![
            result("a", None, 2, 0),
            result("b", Some("decode error"), 4, 2),
        ];
        let summary = RunSummary::from_results("transcode", 3, &results);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total_retries, 2);
        assert_eq!(summary.average_duration_seconds, 3.0);
        assert_eq!(summary.exit_code, ExitCode::ProcessingError);
        assert_eq!(
            summary.render_text(),
            "transcode: 1 succeeded, 1 failed, 1 skipped (of 3)\n\
             average duration 3.00s, 2 retries\n  failed b: decode error"
        );
    }

    #[test]
    fn empty_run_is_a_user_error() {
        let summary = RunSummary::from_results::<()>("noop", 0, &[]);
        assert_eq!(summary.exit_code, ExitCode::UserError);
        assert_eq!(summary.average_duration_seconds, 0.0);
        assert_eq!(summary.render_text(), "noop: 0 succeeded, 0 failed, 0 skipped (of 0)");
    }
}
