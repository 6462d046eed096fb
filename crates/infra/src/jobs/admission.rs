//! Admission control: a token bucket capping in-flight remote jobs.
//!
//! Every job takes one token before it submits and gives it back once its
//! wait reaches a terminal state. When the bucket is empty `acquire` blocks
//! until a token comes back (or the configured admission timeout passes), so
//! the available count never goes negative.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use bqjob_core::{QueryError, QueryResult};

use crate::config::OrchestratorConfig;

/// Admission control abstraction.
///
/// Implementations must make each `acquire`/`release` a single atomic
/// read-modify-write, whether the counter lives in process or in a shared
/// store.
pub trait AdmissionController: Send + Sync + fmt::Debug {
    /// Take one token, blocking while none is available.
    fn acquire(&self) -> QueryResult<()>;

    /// Return one token. Releases beyond capacity are ignored.
    fn release(&self) -> QueryResult<()>;

    /// Tokens currently available.
    fn available(&self) -> QueryResult<usize>;

    /// Fixed capacity of the bucket.
    fn capacity(&self) -> usize;

    /// Longest `acquire` blocks before failing (`None` = indefinitely).
    fn acquire_timeout(&self) -> Option<Duration> {
        None
    }
}

/// In-process token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: usize,
    acquire_timeout: Option<Duration>,
    available: Mutex<usize>,
    returned: Condvar,
}

impl TokenBucket {
    /// A full bucket; `acquire` waits indefinitely when it is empty.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            acquire_timeout: None,
            available: Mutex::new(capacity),
            returned: Condvar::new(),
        }
    }

    pub fn arc(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let bucket = Self::new(config.admission_capacity);
        match config.admission_timeout {
            Some(timeout) => bucket.with_acquire_timeout(timeout),
            None => bucket,
        }
    }

    /// Give up waiting for a token after `timeout`.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Take a token only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut available = self.lock();
        if *available == 0 {
            return false;
        }
        *available -= 1;
        true
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AdmissionController for TokenBucket {
    fn acquire(&self) -> QueryResult<()> {
        let started = Instant::now();
        let mut available = self.lock();

        while *available == 0 {
            available = match self.acquire_timeout {
                None => self
                    .returned
                    .wait(available)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(timeout) => {
                    let elapsed = started.elapsed();
                    if elapsed >= timeout {
                        return Err(QueryError::AdmissionTimeout {
                            waited_ms: elapsed.as_millis() as u64,
                        });
                    }
                    self.returned
                        .wait_timeout(available, timeout - elapsed)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }

        *available -= 1;
        debug!(available = *available, capacity = self.capacity, "admission token acquired");
        Ok(())
    }

    fn release(&self) -> QueryResult<()> {
        let mut available = self.lock();
        if *available >= self.capacity {
            warn!(capacity = self.capacity, "release on a full token bucket ignored");
            return Ok(());
        }
        *available += 1;
        debug!(available = *available, capacity = self.capacity, "admission token released");
        drop(available);
        self.returned.notify_one();
        Ok(())
    }

    fn available(&self) -> QueryResult<usize> {
        Ok(*self.lock())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout
    }
}

static SHARED_BUCKET: OnceLock<Arc<TokenBucket>> = OnceLock::new();

/// The process-wide bucket used by jobs without an explicit controller.
///
/// Created on first access from [`OrchestratorConfig::from_env`] and kept
/// for the life of the process.
pub fn shared_token_bucket() -> Arc<TokenBucket> {
    SHARED_BUCKET
        .get_or_init(|| {
            let config = OrchestratorConfig::from_env();
            debug!(capacity = config.admission_capacity, "creating shared token bucket");
            Arc::new(TokenBucket::from_config(&config))
        })
        .clone()
}

/// One held admission token, returned to its controller on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Arc<dyn AdmissionController>,
    held: bool,
}

impl AdmissionPermit {
    /// Block until `controller` grants a token.
    pub fn acquire(controller: Arc<dyn AdmissionController>) -> QueryResult<Self> {
        controller.acquire()?;
        Ok(Self {
            controller,
            held: true,
        })
    }

    /// Return the token now, reporting backing-store failures.
    pub fn release(mut self) -> QueryResult<()> {
        self.held = false;
        self.controller.release()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.controller.release() {
                warn!(error = %e, "failed to release admission token");
            }
        }
    }
}
