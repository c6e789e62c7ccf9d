//! Retry loop and backoff policy for per-item work.
//!
//! A single policy type drives every retry in the crate. Fixed delay is the
//! default; exponential backoff is opt-in through config.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Delay strategy between attempts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed {
        delay_seconds: f64,
    },
    Exponential {
        initial_seconds: f64,
        factor: f64,
        max_seconds: f64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed { delay_seconds: 0.0 }
    }
}

impl Backoff {
    /// Delay to sleep before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let seconds = match *self {
            Backoff::Fixed { delay_seconds } => delay_seconds,
            Backoff::Exponential {
                initial_seconds,
                factor,
                max_seconds,
            } => {
                let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
                (initial_seconds * factor.powi(exponent)).min(max_seconds)
            }
        };
        seconds_to_duration(seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let finite_non_negative = |value: f64| value.is_finite() && value >= 0.0;
        match *self {
            Backoff::Fixed { delay_seconds } => {
                if !finite_non_negative(delay_seconds) {
                    anyhow::bail!("retry delay must be >= 0 (got {delay_seconds})");
                }
            }
            Backoff::Exponential {
                initial_seconds,
                factor,
                max_seconds,
            } => {
                if !finite_non_negative(initial_seconds) || !finite_non_negative(max_seconds) {
                    anyhow::bail!("exponential backoff delays must be >= 0");
                }
                if !factor.is_finite() || factor < 1.0 {
                    anyhow::bail!("exponential backoff factor must be >= 1 (got {factor})");
                }
            }
        }
        Ok(())
    }
}

/// Non-positive or NaN delays are zero; delays past `Duration::MAX` saturate.
fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// How a failed item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The single permitted attempt failed.
    Failed,
    /// Every configured retry was consumed.
    RetriesExhausted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Failed => f.write_str("failed"),
            FailureKind::RetriesExhausted => f.write_str("retries_exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

/// Tagged result of a retried operation plus every attempt's error message.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, Failure>,
    pub attempt_errors: Vec<String>,
}

impl<T> RetryOutcome<T> {
    /// Number of attempts that failed, including the last one on exhaustion.
    pub fn failed_attempts(&self) -> u32 {
        u32::try_from(self.attempt_errors.len()).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Run `op` until it succeeds or `max_retries` retries are used up.
    ///
    /// `op` receives the zero-based attempt index. `on_retry` is invoked with
    /// the upcoming retry number and the error that triggered it, before the
    /// backoff sleep.
    pub fn run<T, F, R>(&self, mut op: F, mut on_retry: R) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> anyhow::Result<T>,
        R: FnMut(u32, &str),
    {
        let mut attempt_errors = Vec::new();
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempt_errors,
                    };
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    attempt_errors.push(message.clone());
                    if attempt >= self.max_retries {
                        let kind = if self.max_retries == 0 {
                            FailureKind::Failed
                        } else {
                            FailureKind::RetriesExhausted
                        };
                        return RetryOutcome {
                            result: Err(Failure { kind, message }),
                            attempt_errors,
                        };
                    }
                    attempt += 1;
                    on_retry(attempt, &message);
                    let delay = self.backoff.delay(attempt);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
            }
        }
    }
}
