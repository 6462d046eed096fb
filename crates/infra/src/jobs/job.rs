//! One remote query and its lifecycle.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use bqjob_core::{JobId, JobReference, QueryError, QueryResult, TableReference, TypedRow};

use super::admission::{shared_token_bucket, AdmissionController, AdmissionPermit};
use super::backoff::retry_with_backoff;
use super::types::{CancellationToken, JobOptions, JobState};
use crate::remote::{JobStatistics, JobStatus, RemoteQueryService, Table};

/// A remote query job.
///
/// Single use: `submit` once, then `wait` once. The admission token taken by
/// `submit` is held until the job reaches a terminal state.
pub struct Job {
    id: JobId,
    query: String,
    options: JobOptions,
    service: Arc<dyn RemoteQueryService>,
    admission: Arc<dyn AdmissionController>,
    state: JobState,
    job_reference: Option<JobReference>,
    permit: Option<AdmissionPermit>,
    sibling_cancel: Option<CancellationToken>,
    rows: Option<Vec<TypedRow>>,
    statistics: Option<JobStatistics>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("query", &self.query)
            .field("state", &self.state)
            .field("job_reference", &self.job_reference)
            .field("rows", &self.rows.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Create a job for `query` against `service`.
    ///
    /// Fails with `InvalidConfig` for an empty query or invalid options.
    pub fn new(
        service: Arc<dyn RemoteQueryService>,
        query: impl Into<String>,
        options: JobOptions,
    ) -> QueryResult<Self> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(QueryError::invalid_config("query text must not be empty"));
        }
        options.validate()?;

        let admission = match &options.admission {
            Some(admission) => admission.clone(),
            None => shared_token_bucket(),
        };

        let now = Utc::now();
        Ok(Self {
            id: JobId::new(),
            query,
            options,
            service,
            admission,
            state: JobState::Created,
            job_reference: None,
            permit: None,
            sibling_cancel: None,
            rows: None,
            statistics: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_verbose(&self) -> bool {
        self.options.verbose
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Remote reference, present once submission succeeded.
    pub fn job_reference(&self) -> Option<&JobReference> {
        self.job_reference.as_ref()
    }

    /// Materialized rows, present only in `Completed`.
    pub fn rows(&self) -> Option<&[TypedRow]> {
        self.rows.as_deref()
    }

    pub fn statistics(&self) -> Option<&JobStatistics> {
        self.statistics.as_ref()
    }

    pub fn error(&self) -> Option<&QueryError> {
        match &self.state {
            JobState::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Take an admission token and start the query remotely.
    ///
    /// Transient submit failures are retried with backoff. Any failure moves
    /// the job to `Failed` and returns the token.
    pub fn submit(&mut self) -> QueryResult<()> {
        self.submit_with_cancel(&CancellationToken::new())
    }

    pub(crate) fn submit_with_cancel(&mut self, cancel: &CancellationToken) -> QueryResult<()> {
        if self.state != JobState::Created {
            return Err(QueryError::invalid_state(format!(
                "job {} cannot be submitted while {}",
                self.id, self.state
            )));
        }

        if cancel.is_cancelled() {
            return Err(self.fail(QueryError::Cancelled));
        }
        let permit = match AdmissionPermit::acquire(self.admission.clone()) {
            Ok(permit) => permit,
            Err(e) => return Err(self.fail(e)),
        };
        self.permit = Some(permit);
        // A sibling may have failed while this job waited for its token.
        if cancel.is_cancelled() {
            return Err(self.fail(QueryError::Cancelled));
        }
        self.transition(JobState::Submitted);

        let service = &self.service;
        let submitted = retry_with_backoff("submit", &self.options.retry, || {
            service.submit(&self.query, &self.options.query)
        })
        .and_then(|submitted| service.construct_object_reference(&submitted));

        match submitted {
            Ok(reference) => {
                debug!(job_id = %self.id, remote_job = %reference, "job submitted");
                self.job_reference = Some(reference);
                self.transition(JobState::Waiting);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Same as [`submit`](Self::submit).
    pub fn run_async(&mut self) -> QueryResult<()> {
        self.submit()
    }

    /// Wait for the remote job and materialize its rows.
    ///
    /// `timeout` bounds the whole wait (`None` = unbounded). A remote error,
    /// a timeout, or a failed result fetch moves the job to `Failed`.
    pub fn wait(&mut self, timeout: Option<Duration>) -> QueryResult<Vec<TypedRow>> {
        self.wait_with_cancel(timeout, &CancellationToken::new())
    }

    /// `submit` followed by `wait`; the first failure is returned.
    pub fn run_sync(&mut self, timeout: Option<Duration>) -> QueryResult<Vec<TypedRow>> {
        self.submit()?;
        self.wait(timeout)
    }

    /// The job's outcome, waiting with the default timeout if needed.
    ///
    /// Completed jobs return their rows again and failed jobs their error.
    pub fn result(&mut self) -> QueryResult<Vec<TypedRow>> {
        self.resolve(self.options.default_timeout, &CancellationToken::new())
    }

    pub(crate) fn admission(&self) -> &Arc<dyn AdmissionController> {
        &self.admission
    }

    /// Cancel `token` on this job's next failure, before its admission
    /// token goes back to the bucket.
    pub(crate) fn cancel_on_failure(&mut self, token: Option<CancellationToken>) {
        self.sibling_cancel = token;
    }

    pub(crate) fn resolve(
        &mut self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> QueryResult<Vec<TypedRow>> {
        match &self.state {
            JobState::Completed => Ok(self.rows.clone().unwrap_or_default()),
            JobState::Failed(err) => Err(err.clone()),
            JobState::Waiting => self.wait_with_cancel(timeout, cancel),
            JobState::Created | JobState::Submitted => Err(QueryError::invalid_state(format!(
                "job {} has no result while {}",
                self.id, self.state
            ))),
        }
    }

    pub(crate) fn wait_with_cancel(
        &mut self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> QueryResult<Vec<TypedRow>> {
        let reference = match (&self.state, &self.job_reference) {
            (JobState::Waiting, Some(reference)) => reference.clone(),
            _ => {
                return Err(QueryError::invalid_state(format!(
                    "job {} cannot wait while {}",
                    self.id, self.state
                )));
            }
        };

        // A deadline past what `Instant` can represent means no deadline.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            if cancel.is_cancelled() {
                return Err(self.fail(QueryError::Cancelled));
            }

            let budget = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let service = &self.service;
            let status = retry_with_backoff("poll", &self.options.retry, || {
                service.poll(&reference, budget)
            });

            match status {
                Ok(JobStatus::Pending) => {
                    let pause = match deadline {
                        Some(deadline) => {
                            let now = Instant::now();
                            if now >= deadline {
                                return Err(self.fail(QueryError::Timeout));
                            }
                            self.options.poll_interval.min(deadline - now)
                        }
                        None => self.options.poll_interval,
                    };
                    thread::sleep(pause);
                }
                Ok(JobStatus::Error { message, payload }) => {
                    return Err(self.fail(QueryError::RemoteJob { message, payload }));
                }
                Ok(JobStatus::Done {
                    destination_table,
                    statistics,
                }) => return self.complete(&reference, destination_table, statistics),
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn complete(
        &mut self,
        reference: &JobReference,
        destination: TableReference,
        statistics: JobStatistics,
    ) -> QueryResult<Vec<TypedRow>> {
        self.release_admission();

        if self.options.verbose {
            info!(
                project_id = %reference.project_id,
                job_id = %reference.job_id,
                query = %self.query,
                total_bytes_processed = ?statistics.total_bytes_processed,
                cache_hit = statistics.cache_hit,
                "query statistics"
            );
        }
        self.statistics = Some(statistics);

        let table = Table::new(self.service.clone(), destination)
            .with_retry_policy(self.options.retry.clone());
        match table.read_rows(self.options.max_rows) {
            Ok(rows) => {
                debug!(job_id = %self.id, rows = rows.len(), "job completed");
                self.rows = Some(rows.clone());
                self.transition(JobState::Completed);
                Ok(rows)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Record a terminal failure, return the admission token, and hand the
    /// error back for propagation.
    fn fail(&mut self, error: QueryError) -> QueryError {
        if let Some(token) = &self.sibling_cancel {
            if !matches!(error, QueryError::Cancelled) {
                token.cancel();
            }
        }
        self.release_admission();
        warn!(job_id = %self.id, from = %self.state, error = %error, "job failed");
        self.transition(JobState::Failed(error.clone()));
        error
    }

    fn release_admission(&mut self) {
        if let Some(permit) = self.permit.take() {
            if let Err(e) = permit.release() {
                warn!(job_id = %self.id, error = %e, "failed to release admission token");
            }
        }
    }

    fn transition(&mut self, next: JobState) {
        self.state = next;
        self.updated_at = Utc::now();
    }
}
