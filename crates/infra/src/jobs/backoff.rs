//! Blocking retry with exponential backoff around remote calls.

use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use bqjob_core::{QueryError, QueryResult};

use super::types::RetryPolicy;

/// Attempt counter and current delay for one retried call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffState {
    attempts: u32,
    delay: Duration,
}

impl BackoffState {
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            attempts: 0,
            delay: initial_delay,
        }
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to sleep before the next attempt.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record a failed attempt and return the delay to sleep before retrying.
    /// The delay doubles for the attempt after.
    pub fn record_failure(&mut self) -> Duration {
        self.attempts += 1;
        let current = self.delay;
        self.delay = self.delay.saturating_mul(2);
        current
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_retries` attempts have failed.
///
/// Only [`QueryError::TransientRemote`] is retried; every other error is
/// returned unchanged on first sight. Between attempts the calling thread
/// sleeps, starting at `policy.initial_delay` and doubling each time.
/// Exhaustion returns [`QueryError::RetryExhausted`]; the last transient
/// error is only logged.
pub fn retry_with_backoff<T, F>(name: &str, policy: &RetryPolicy, mut operation: F) -> QueryResult<T>
where
    F: FnMut() -> QueryResult<T>,
{
    let mut state = BackoffState::new(policy.initial_delay);

    while policy.should_retry(state.attempts()) {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                let delay = state.record_failure();
                if !policy.should_retry(state.attempts()) {
                    warn!(
                        operation = name,
                        attempts = state.attempts(),
                        error = %err,
                        "retries exhausted"
                    );
                    break;
                }
                info!(
                    operation = name,
                    attempt = state.attempts(),
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, will retry after backoff"
                );
                thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }

    Err(QueryError::RetryExhausted {
        attempts: policy.max_retries,
    })
}
