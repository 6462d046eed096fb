//! Orchestration configuration.
//!
//! Defaults match the library's documented behaviour; every value can be
//! overridden from the environment. Unparseable values are logged and
//! replaced with the default.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use bqjob_core::{QueryError, QueryResult};

use crate::jobs::types::RetryPolicy;

pub const ADMISSION_CAPACITY_ENV: &str = "BQJOB_ADMISSION_CAPACITY";
pub const ADMISSION_TIMEOUT_ENV: &str = "BQJOB_ADMISSION_TIMEOUT_SECS";
pub const RETRY_COUNT_ENV: &str = "BQJOB_RETRY_COUNT";
pub const INITIAL_BACKOFF_ENV: &str = "BQJOB_INITIAL_BACKOFF_MS";
pub const DEFAULT_TIMEOUT_ENV: &str = "BQJOB_DEFAULT_TIMEOUT_SECS";
pub const POLL_INTERVAL_ENV: &str = "BQJOB_POLL_INTERVAL_MS";

/// Default bound on how long a job waits for an admission token.
pub const DEFAULT_ADMISSION_TIMEOUT: Duration = Duration::from_secs(600);

/// Settings shared by the jobs of one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum concurrently in-flight jobs
    pub admission_capacity: usize,
    /// How long `acquire` may block for a token (`None` = indefinitely).
    /// From the environment, `0` means indefinitely.
    pub admission_timeout: Option<Duration>,
    /// Backoff around remote calls
    pub retry: RetryPolicy,
    /// Wait budget when none is given (`None` = unbounded)
    pub default_wait_timeout: Option<Duration>,
    /// Pause between status polls
    pub poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            admission_capacity: 5,
            admission_timeout: Some(DEFAULT_ADMISSION_TIMEOUT),
            retry: RetryPolicy::default(),
            default_wait_timeout: None,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by the `BQJOB_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let admission_capacity = parse_var(&lookup, ADMISSION_CAPACITY_ENV)
            .filter(|capacity: &usize| {
                if *capacity == 0 {
                    warn!(var = ADMISSION_CAPACITY_ENV, "admission capacity must be positive; using default");
                }
                *capacity > 0
            })
            .unwrap_or(defaults.admission_capacity);

        let admission_timeout = match parse_var(&lookup, ADMISSION_TIMEOUT_ENV) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.admission_timeout,
        };

        let retry = RetryPolicy {
            max_retries: parse_var(&lookup, RETRY_COUNT_ENV).unwrap_or(defaults.retry.max_retries),
            initial_delay: parse_var(&lookup, INITIAL_BACKOFF_ENV)
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.initial_delay),
        };

        let default_wait_timeout = parse_var(&lookup, DEFAULT_TIMEOUT_ENV)
            .map(Duration::from_secs)
            .or(defaults.default_wait_timeout);

        let poll_interval = parse_var(&lookup, POLL_INTERVAL_ENV)
            .filter(|ms: &u64| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        Self {
            admission_capacity,
            admission_timeout,
            retry,
            default_wait_timeout,
            poll_interval,
        }
    }

    pub fn with_admission_capacity(mut self, capacity: usize) -> Self {
        self.admission_capacity = capacity;
        self
    }

    /// `None` lets `acquire` block indefinitely.
    pub fn with_admission_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.admission_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_default_wait_timeout(mut self, timeout: Duration) -> Self {
        self.default_wait_timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn validate(&self) -> QueryResult<()> {
        if self.admission_capacity == 0 {
            return Err(QueryError::invalid_config("admission capacity must be positive"));
        }
        if self.poll_interval.is_zero() {
            return Err(QueryError::invalid_config("poll interval must be positive"));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "invalid value; using default");
            None
        }
    }
}
