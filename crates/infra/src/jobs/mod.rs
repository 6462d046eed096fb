//! Remote query jobs with admission control, retry, and grouping.
//!
//! ## Design
//!
//! - Jobs are single use: `Created → Submitted → Waiting → Completed | Failed`
//! - Every remote call is wrapped in exponential backoff
//! - A token bucket caps the number of jobs in flight
//! - Groups run their members concurrently and return rows in insertion order
//!
//! ## Components
//!
//! - `Job`: One query, its lifecycle and its materialized rows
//! - `JobGroup`: Borrowing fan-out/fan-in over several jobs
//! - `AdmissionController`: Token bucket (in-process or Redis-backed)
//! - `retry_with_backoff`: Retry loop for transient remote failures

pub mod admission;
#[cfg(feature = "redis")]
pub mod admission_redis;
pub mod backoff;
pub mod group;
pub mod job;
pub mod types;

pub use admission::{shared_token_bucket, AdmissionController, AdmissionPermit, TokenBucket};
#[cfg(feature = "redis")]
pub use admission_redis::RedisTokenBucket;
pub use backoff::{retry_with_backoff, BackoffState};
pub use group::{FailurePolicy, JobGroup};
pub use job::Job;
pub use types::{CancellationToken, JobOptions, JobState, RetryPolicy};
