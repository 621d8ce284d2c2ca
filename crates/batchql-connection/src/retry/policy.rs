//! Transient-failure classification and the retry loop

use std::collections::HashSet;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use batchql_core::DriverError;
use serde::{Deserialize, Serialize};

use super::BackoffStrategy;

/// Server error numbers that indicate a temporary condition: deadlock
/// victims, login throttling, failover in progress, resource governance
/// limits and dropped transport sessions.
pub fn default_transient_error_numbers() -> Vec<u32> {
    vec![
        20, 64, 233, 615, 926, 1205, 4060, 4221, 10053, 10054, 10060, 10928, 10929, 40143, 40197,
        40501, 40540, 40613, 42108, 42109, 49918, 49919, 49920,
    ]
}

/// Serializable retry settings, usually read from the `[retry]` table of
/// the engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; 0 disables retrying
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Server error numbers treated as transient
    pub transient_error_numbers: Vec<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: false,
            transient_error_numbers: default_transient_error_numbers(),
        }
    }
}

/// Decides whether a failed operation is retried and how long to wait.
///
/// The policy itself holds no per-operation state; each operation gets its
/// own `RetryState` from `begin`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: BackoffStrategy,
    transient_errors: HashSet<u32>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_retries,
            backoff,
            transient_errors: default_transient_error_numbers().into_iter().collect(),
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self::new(0, BackoffStrategy::default())
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let backoff = BackoffStrategy::from_millis(config.initial_backoff_ms, config.max_backoff_ms)
            .with_multiplier(config.backoff_multiplier)
            .with_jitter(config.jitter);
        Self::new(config.max_retries, backoff)
            .with_transient_errors(config.transient_error_numbers.iter().copied())
    }

    /// Replace the set of server error numbers treated as transient
    pub fn with_transient_errors(mut self, numbers: impl IntoIterator<Item = u32>) -> Self {
        self.transient_errors = numbers.into_iter().collect();
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    /// True if retrying `error` might succeed.
    ///
    /// Server errors are matched on their number alone, so a listed number
    /// is retried whatever its severity.
    pub fn is_transient(&self, error: &DriverError) -> bool {
        match error {
            DriverError::Timeout(_) | DriverError::ConnectionBroken(_) => true,
            DriverError::Io(err) => matches!(
                err.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::TimedOut
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            ),
            DriverError::Server(err) => self.transient_errors.contains(&err.number),
            DriverError::Connection(_) | DriverError::Cancelled | DriverError::Other(_) => false,
        }
    }

    /// Start tracking a new operation
    pub fn begin(&self) -> RetryState<'_> {
        RetryState {
            policy: self,
            attempts: 0,
            last_error: None,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of
    /// attempts. The closure receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, DriverError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        self.execute_with_observer(operation, |_| {}).await
    }

    /// Like `execute`, reporting progress to `observer`
    pub async fn execute_with_observer<T, F, Fut, O>(
        &self,
        mut operation: F,
        mut observer: O,
    ) -> Result<T, DriverError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
        O: FnMut(&RetryEvent),
    {
        let mut state = self.begin();
        loop {
            let attempt = state.start_attempt();
            observer(&RetryEvent::Attempting {
                attempt,
                max_attempts: self.max_attempts(),
            });

            let error = match operation(attempt).await {
                Ok(value) => {
                    observer(&RetryEvent::Succeeded {
                        attempts_taken: attempt,
                    });
                    return Ok(value);
                }
                Err(error) => error,
            };

            observer(&RetryEvent::Failed {
                attempt,
                error: error.to_string(),
                retryable: self.is_transient(&error),
            });

            match state.on_failure(error) {
                RetryDecision::Retry { delay } => {
                    observer(&RetryEvent::Backoff { attempt, delay });
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp { error, exhausted } => {
                    if exhausted {
                        observer(&RetryEvent::Exhausted {
                            total_attempts: attempt,
                        });
                    }
                    return Err(error);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Per-operation retry bookkeeping.
///
/// Used directly when the retried work cannot be expressed as a closure,
/// such as a batch whose notices stream out while it runs.
#[derive(Debug)]
pub struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
    last_error: Option<String>,
}

impl RetryState<'_> {
    /// Record the start of an attempt and return its 1-based number
    pub fn start_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Message of the most recent failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Classify a failed attempt
    pub fn on_failure(&mut self, error: DriverError) -> RetryDecision {
        self.last_error = Some(error.to_string());

        if !self.policy.is_transient(&error) {
            tracing::debug!(attempt = self.attempts, error = %error, "permanent failure");
            return RetryDecision::GiveUp {
                error,
                exhausted: false,
            };
        }
        if self.attempts > self.policy.max_retries {
            tracing::warn!(attempts = self.attempts, error = %error, "retries exhausted");
            return RetryDecision::GiveUp {
                error,
                exhausted: true,
            };
        }

        let delay = self.policy.backoff.delay_for(self.attempts.saturating_sub(1));
        tracing::debug!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "transient failure, retrying"
        );
        RetryDecision::Retry { delay }
    }
}

/// What to do after a failed attempt
#[derive(Debug)]
pub enum RetryDecision {
    /// Wait `delay`, then try again
    Retry { delay: Duration },
    /// Surface `error`; `exhausted` is true when it was transient but no
    /// attempts remain
    GiveUp { error: DriverError, exhausted: bool },
}

/// Progress of a retried operation, for monitoring
#[derive(Debug, Clone, PartialEq)]
pub enum RetryEvent {
    Attempting { attempt: u32, max_attempts: u32 },
    Failed { attempt: u32, error: String, retryable: bool },
    /// About to sleep before the next attempt
    Backoff { attempt: u32, delay: Duration },
    Succeeded { attempts_taken: u32 },
    Exhausted { total_attempts: u32 },
}
