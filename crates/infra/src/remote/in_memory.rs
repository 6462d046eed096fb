//! In-memory query service for tests/dev.
//!
//! Queries are answered from scripts registered up front: a result set (with
//! an optional number of polls that report `Pending` first), a remote error,
//! or a job that never finishes. Transient failures can be queued for the
//! next submit or poll calls.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bqjob_core::{JobReference, QueryError, QueryResult, RawRow, Schema, TableReference};

use super::{JobStatistics, JobStatus, QueryOptions, RemoteQueryService, RowStream, SubmittedJob};

/// Dataset holding anonymous destination tables of finished queries.
pub const ANONYMOUS_DATASET: &str = "_anonymous";

/// Scripted behaviour for one query text.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedQuery {
    outcome: Outcome,
    pending_polls: u32,
    statistics: JobStatistics,
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Rows { schema: Schema, rows: Vec<RawRow> },
    Error { message: String },
    NeverDone,
}

impl ScriptedQuery {
    /// Finishes with the given result set.
    pub fn rows(schema: Schema, rows: Vec<RawRow>) -> Self {
        Self {
            outcome: Outcome::Rows { schema, rows },
            pending_polls: 0,
            statistics: JobStatistics::default(),
        }
    }

    /// Finishes with a remote-reported error.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Error {
                message: message.into(),
            },
            pending_polls: 0,
            statistics: JobStatistics::default(),
        }
    }

    /// Stays pending forever.
    pub fn never_done() -> Self {
        Self {
            outcome: Outcome::NeverDone,
            pending_polls: 0,
            statistics: JobStatistics::default(),
        }
    }

    /// Report `Pending` for this many polls before the outcome.
    pub fn pending_for(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    pub fn with_statistics(mut self, statistics: JobStatistics) -> Self {
        self.statistics = statistics;
        self
    }
}

#[derive(Debug)]
struct RemoteJob {
    script: ScriptedQuery,
    destination: TableReference,
    polls: u32,
    finished: bool,
}

#[derive(Debug, Default)]
struct State {
    next_job: u64,
    default_script: Option<ScriptedQuery>,
    scripts: HashMap<String, ScriptedQuery>,
    submit_failures: VecDeque<QueryError>,
    poll_failures: VecDeque<QueryError>,
    jobs: HashMap<String, RemoteJob>,
    tables: HashMap<TableReference, (Schema, Vec<RawRow>)>,
    submitted: Vec<(String, QueryOptions)>,
    submit_calls: usize,
    poll_calls: usize,
    in_flight: usize,
    peak_in_flight: usize,
}

/// In-memory [`RemoteQueryService`].
#[derive(Debug)]
pub struct InMemoryQueryService {
    project_id: String,
    state: Mutex<State>,
}

impl InMemoryQueryService {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn arc(project_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(project_id))
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Script used for any query text without its own script.
    pub fn set_default(&self, script: ScriptedQuery) {
        self.lock().default_script = Some(script);
    }

    /// Script for one exact query text.
    pub fn script(&self, query: impl Into<String>, script: ScriptedQuery) {
        self.lock().scripts.insert(query.into(), script);
    }

    /// Register a table readable through `fetch_schema`/`fetch_rows`.
    pub fn insert_table(&self, table: TableReference, schema: Schema, rows: Vec<RawRow>) {
        self.lock().tables.insert(table, (schema, rows));
    }

    /// Make the next submit calls fail, one error per call.
    pub fn fail_next_submits(&self, errors: impl IntoIterator<Item = QueryError>) {
        self.lock().submit_failures.extend(errors);
    }

    /// Make the next poll calls fail, one error per call.
    pub fn fail_next_polls(&self, errors: impl IntoIterator<Item = QueryError>) {
        self.lock().poll_failures.extend(errors);
    }

    pub fn submit_calls(&self) -> usize {
        self.lock().submit_calls
    }

    pub fn poll_calls(&self) -> usize {
        self.lock().poll_calls
    }

    /// Query texts and options accepted so far, in submission order.
    pub fn submitted(&self) -> Vec<(String, QueryOptions)> {
        self.lock().submitted.clone()
    }

    /// Jobs accepted but not yet reported finished.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Highest number of simultaneously unfinished jobs seen.
    pub fn peak_in_flight(&self) -> usize {
        self.lock().peak_in_flight
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RemoteQueryService for InMemoryQueryService {
    fn submit(&self, query: &str, options: &QueryOptions) -> QueryResult<SubmittedJob> {
        let mut state = self.lock();
        state.submit_calls += 1;

        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }

        let script = state
            .scripts
            .get(query)
            .or(state.default_script.as_ref())
            .cloned()
            .ok_or_else(|| QueryError::not_found(format!("no result scripted for query: {query}")))?;

        state.next_job += 1;
        let job_id = format!("job_{}", state.next_job);
        let destination = options.destination_table.clone().unwrap_or_else(|| {
            TableReference::new(&self.project_id, ANONYMOUS_DATASET, format!("anon_{job_id}"))
        });

        state.jobs.insert(
            job_id.clone(),
            RemoteJob {
                script,
                destination,
                polls: 0,
                finished: false,
            },
        );
        state.submitted.push((query.to_string(), options.clone()));
        state.in_flight += 1;
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight);

        Ok(SubmittedJob {
            job_reference: JobReference::new(&self.project_id, job_id),
            query: query.to_string(),
        })
    }

    fn poll(&self, job: &JobReference, _budget: Option<Duration>) -> QueryResult<JobStatus> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.poll_calls += 1;

        if let Some(err) = state.poll_failures.pop_front() {
            return Err(err);
        }

        let remote = state
            .jobs
            .get_mut(&job.job_id)
            .ok_or_else(|| QueryError::not_found(format!("job not found: {job}")))?;

        remote.polls += 1;
        if remote.polls <= remote.script.pending_polls {
            return Ok(JobStatus::Pending);
        }

        let status = match &remote.script.outcome {
            Outcome::NeverDone => return Ok(JobStatus::Pending),
            Outcome::Error { message } => JobStatus::Error {
                message: message.clone(),
                payload: None,
            },
            Outcome::Rows { schema, rows } => {
                state
                    .tables
                    .insert(remote.destination.clone(), (schema.clone(), rows.clone()));
                JobStatus::Done {
                    destination_table: remote.destination.clone(),
                    statistics: remote.script.statistics.clone(),
                }
            }
        };

        if !remote.finished {
            remote.finished = true;
            state.in_flight -= 1;
        }
        Ok(status)
    }

    fn fetch_schema(&self, table: &TableReference) -> QueryResult<Schema> {
        self.lock()
            .tables
            .get(table)
            .map(|(schema, _)| schema.clone())
            .ok_or_else(|| QueryError::not_found(format!("table not found: {table}")))
    }

    fn fetch_rows(&self, table: &TableReference) -> QueryResult<RowStream> {
        let rows = self
            .lock()
            .tables
            .get(table)
            .map(|(_, rows)| rows.clone())
            .ok_or_else(|| QueryError::not_found(format!("table not found: {table}")))?;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}
