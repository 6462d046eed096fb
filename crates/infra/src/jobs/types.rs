//! Core job types and policies.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bqjob_core::QueryError;

use super::admission::AdmissionController;
use crate::config::OrchestratorConfig;
use crate::remote::QueryOptions;

/// Lifecycle state of a [`Job`](super::Job).
///
/// `Created → Submitted → Waiting → Completed`, or `Failed` from any
/// non-terminal state. There are no transitions out of a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    /// Constructed, not yet sent to the remote service
    Created,
    /// Holding an admission token, submission in progress
    Submitted,
    /// Accepted remotely, waiting for the remote job to finish
    Waiting,
    /// Rows materialized
    Completed,
    /// Terminal failure
    Failed(QueryError),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Submitted => "submitted",
            JobState::Waiting => "waiting",
            JobState::Completed => "completed",
            JobState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Retry policy for transient remote failures.
///
/// Pure exponential backoff: the first retry waits `initial_delay`, each later
/// one twice the previous delay. No jitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 = fail without calling)
    pub max_retries: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::ZERO,
        }
    }

    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    /// Delay to sleep after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.initial_delay.saturating_mul(factor)
    }

    /// Check if another attempt is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }
}

/// Optional per-job settings. Required settings are parameters of
/// [`Job::new`](super::Job::new).
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Log a statistics summary when the job completes
    pub verbose: bool,
    /// Backoff for submit, poll and result fetches
    pub retry: RetryPolicy,
    /// Pause between status polls while the remote job is pending
    pub poll_interval: Duration,
    /// Wait budget used by `result()` (`None` = unbounded)
    pub default_timeout: Option<Duration>,
    /// Cap on the number of rows materialized
    pub max_rows: Option<usize>,
    /// Options forwarded with the submission
    pub query: QueryOptions,
    /// Admission controller; `None` uses the process-wide shared bucket
    pub admission: Option<Arc<dyn AdmissionController>>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

impl JobOptions {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            verbose: true,
            retry: config.retry.clone(),
            poll_interval: config.poll_interval,
            default_timeout: config.default_wait_timeout,
            max_rows: None,
            query: QueryOptions::default(),
            admission: None,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn with_query_options(mut self, options: QueryOptions) -> Self {
        self.query = options;
        self
    }

    pub fn with_admission(mut self, admission: Arc<dyn AdmissionController>) -> Self {
        self.admission = Some(admission);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), QueryError> {
        if self.poll_interval.is_zero() {
            return Err(QueryError::invalid_config("poll interval must be positive"));
        }
        Ok(())
    }
}

/// Shared flag that tells in-progress waits to give up.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100));

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = RetryPolicy::exponential(u32::MAX, Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn should_retry_respects_max_retries() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Created.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed(QueryError::Timeout).is_terminal());
        assert_eq!(JobState::Failed(QueryError::Timeout).to_string(), "failed");
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let options = JobOptions::default().with_poll_interval(Duration::ZERO);
        assert!(matches!(options.validate(), Err(QueryError::InvalidConfig(_))));
        assert!(JobOptions::default().validate().is_ok());
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
