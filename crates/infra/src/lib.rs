//! Infrastructure layer: remote query service boundary, jobs, config.

pub mod config;
pub mod jobs;
pub mod remote;

pub use config::OrchestratorConfig;
pub use jobs::{FailurePolicy, Job, JobGroup, JobOptions, JobState, RetryPolicy};
pub use remote::{QueryOptions, RemoteQueryService, Table};
