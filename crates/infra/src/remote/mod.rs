//! Boundary to the remote query service.
//!
//! The concrete API client (transport, auth, wire format) lives outside this
//! workspace. Jobs only depend on the [`RemoteQueryService`] capability; the
//! in-memory implementation backs tests and local development.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bqjob_core::{JobReference, QueryResult, RawRow, Schema, TableReference};

pub mod in_memory;
pub mod table;

pub use in_memory::{InMemoryQueryService, ScriptedQuery};
pub use table::Table;

/// Lazy, finite, non-restartable sequence of raw result rows.
pub type RowStream = Box<dyn Iterator<Item = QueryResult<RawRow>> + Send>;

/// Scheduling priority requested for a query.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryPriority {
    #[default]
    Interactive,
    Batch,
}

/// Options sent along with a query submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    pub priority: QueryPriority,
    pub use_query_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_table: Option<TableReference>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            priority: QueryPriority::Interactive,
            use_query_cache: true,
            destination_table: None,
            labels: BTreeMap::new(),
        }
    }
}

impl QueryOptions {
    pub fn with_priority(mut self, priority: QueryPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_query_cache(mut self, enabled: bool) -> Self {
        self.use_query_cache = enabled;
        self
    }

    pub fn with_destination_table(mut self, table: TableReference) -> Self {
        self.destination_table = Some(table);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// What the remote service returns when it accepts a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedJob {
    pub job_reference: JobReference,
    pub query: String,
}

/// Statistics reported for a finished query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatistics {
    #[serde(default)]
    pub total_bytes_processed: Option<u64>,
    #[serde(default)]
    pub cache_hit: bool,
}

/// Remote status of a submitted job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Done {
        destination_table: TableReference,
        statistics: JobStatistics,
    },
    Error {
        message: String,
        payload: Option<JsonValue>,
    },
}

impl JobStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::Pending)
    }
}

/// The remote query service as consumed by jobs.
///
/// Implementations report rate limiting and transient server failures as
/// `QueryError::TransientRemote` and missing resources as
/// `QueryError::NotFound`; the job layer retries the former only.
pub trait RemoteQueryService: Send + Sync {
    /// Start a query without waiting for it.
    fn submit(&self, query: &str, options: &QueryOptions) -> QueryResult<SubmittedJob>;

    /// Extract the job reference from a submission result.
    fn construct_object_reference(&self, submitted: &SubmittedJob) -> QueryResult<JobReference> {
        Ok(submitted.job_reference.clone())
    }

    /// Current status of a job. `budget` is how long the caller is still
    /// willing to wait overall (`None` = unbounded); implementations may
    /// long-poll up to it.
    fn poll(&self, job: &JobReference, budget: Option<Duration>) -> QueryResult<JobStatus>;

    fn fetch_schema(&self, table: &TableReference) -> QueryResult<Schema>;

    fn fetch_rows(&self, table: &TableReference) -> QueryResult<RowStream>;
}

impl<T: RemoteQueryService + ?Sized> RemoteQueryService for Arc<T> {
    fn submit(&self, query: &str, options: &QueryOptions) -> QueryResult<SubmittedJob> {
        (**self).submit(query, options)
    }

    fn construct_object_reference(&self, submitted: &SubmittedJob) -> QueryResult<JobReference> {
        (**self).construct_object_reference(submitted)
    }

    fn poll(&self, job: &JobReference, budget: Option<Duration>) -> QueryResult<JobStatus> {
        (**self).poll(job, budget)
    }

    fn fetch_schema(&self, table: &TableReference) -> QueryResult<Schema> {
        (**self).fetch_schema(table)
    }

    fn fetch_rows(&self, table: &TableReference) -> QueryResult<RowStream> {
        (**self).fetch_rows(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_options_serialize_in_wire_case() {
        let options = QueryOptions::default()
            .with_priority(QueryPriority::Batch)
            .with_label("team", "billing");
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "priority": "BATCH",
                "useQueryCache": true,
                "labels": {"team": "billing"},
            })
        );
    }

    #[test]
    fn statistics_default_when_absent() {
        let stats: JobStatistics = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(stats, JobStatistics::default());
        assert!(!stats.cache_hit);
    }
}
