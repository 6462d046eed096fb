//! Redis-backed token bucket for deployments with several processes.
//!
//! The counter is a plain integer key. It is created lazily with `SET NX` at
//! full capacity, and every acquire/release runs as one Lua script, so each
//! read-modify-write is a single atomic step on the server.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use bqjob_core::{QueryError, QueryResult};

use super::admission::AdmissionController;

const ACQUIRE_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1], 'NX')
local available = tonumber(redis.call('GET', KEYS[1]))
if available > 0 then
  redis.call('DECR', KEYS[1])
  return 1
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1], 'NX')
local available = tonumber(redis.call('GET', KEYS[1]))
if available < tonumber(ARGV[1]) then
  redis.call('INCR', KEYS[1])
  return 1
end
return 0
"#;

const AVAILABLE_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1], 'NX')
return tonumber(redis.call('GET', KEYS[1]))
"#;

/// Token bucket whose counter lives in Redis.
pub struct RedisTokenBucket {
    client: redis::Client,
    key: String,
    capacity: usize,
    acquire_timeout: Option<Duration>,
    retry_interval: Duration,
    acquire_script: redis::Script,
    release_script: redis::Script,
    available_script: redis::Script,
}

impl fmt::Debug for RedisTokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTokenBucket")
            .field("key", &self.key)
            .field("capacity", &self.capacity)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl RedisTokenBucket {
    pub fn new(redis_url: impl AsRef<str>, key: impl Into<String>, capacity: usize) -> QueryResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueryError::Admission(e.to_string()))?;
        Ok(Self {
            client,
            key: key.into(),
            capacity,
            acquire_timeout: None,
            retry_interval: Duration::from_millis(100),
            acquire_script: redis::Script::new(ACQUIRE_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
            available_script: redis::Script::new(AVAILABLE_SCRIPT),
        })
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// How long to sleep between attempts while the bucket is empty.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    fn run(&self, script: &redis::Script) -> QueryResult<i64> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| QueryError::Admission(e.to_string()))?;
        script
            .key(&self.key)
            .arg(self.capacity)
            .invoke(&mut conn)
            .map_err(|e| QueryError::Admission(e.to_string()))
    }
}

impl AdmissionController for RedisTokenBucket {
    fn acquire(&self) -> QueryResult<()> {
        let started = Instant::now();
        loop {
            if self.run(&self.acquire_script)? == 1 {
                debug!(key = %self.key, "admission token acquired");
                return Ok(());
            }

            let elapsed = started.elapsed();
            let nap = match self.acquire_timeout {
                Some(timeout) if elapsed >= timeout => {
                    return Err(QueryError::AdmissionTimeout {
                        waited_ms: elapsed.as_millis() as u64,
                    });
                }
                Some(timeout) => self.retry_interval.min(timeout - elapsed),
                None => self.retry_interval,
            };
            thread::sleep(nap);
        }
    }

    fn release(&self) -> QueryResult<()> {
        if self.run(&self.release_script)? == 0 {
            warn!(key = %self.key, capacity = self.capacity, "release on a full token bucket ignored");
        }
        Ok(())
    }

    fn available(&self) -> QueryResult<usize> {
        let available = self.run(&self.available_script)?;
        Ok(available.max(0) as usize)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_is_an_admission_error() {
        let err = RedisTokenBucket::new("not a url", "bqjob:tokens", 5).unwrap_err();
        assert!(matches!(err, QueryError::Admission(_)));
    }

    #[test]
    fn debug_hides_the_client() {
        let bucket = RedisTokenBucket::new("redis://127.0.0.1/", "bqjob:tokens", 5).unwrap();
        let rendered = format!("{bucket:?}");
        assert!(rendered.contains("bqjob:tokens"));
        assert!(rendered.contains("capacity: 5"));
    }
}
