//! Fan-out/fan-in over several jobs.
//!
//! A group borrows its jobs; it never owns them. Submissions and waits run on
//! one scoped thread per member, and results come back in insertion order no
//! matter which member finishes first.

use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use bqjob_core::{JobId, QueryError, QueryResult, TypedRow};

use super::admission::AdmissionController;
use super::job::Job;
use super::types::{CancellationToken, JobState};

/// What a group does when one member fails while waiting.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Cancel the other waits at their next poll
    #[default]
    FailFast,
    /// Wait on every member before reporting
    WaitAll,
}

#[derive(Debug, Default)]
pub struct JobGroup<'a> {
    jobs: Vec<&'a mut Job>,
    policy: FailurePolicy,
    started: bool,
}

impl<'a> JobGroup<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Append a job. Fails once the group has started running.
    pub fn add(&mut self, job: &'a mut Job) -> QueryResult<()> {
        self.ensure_not_started("add")?;
        self.jobs.push(job);
        Ok(())
    }

    /// Remove the member with the given id, handing its borrow back.
    pub fn remove(&mut self, id: JobId) -> QueryResult<Option<&'a mut Job>> {
        self.ensure_not_started("remove")?;
        Ok(self
            .jobs
            .iter()
            .position(|job| job.id() == id)
            .map(|index| self.jobs.remove(index)))
    }

    /// Members in insertion order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().map(|job| &**job)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Submit every member that has not been submitted yet, concurrently.
    ///
    /// All submissions run to completion; the first error in insertion order
    /// is returned. Tokens only come back once members are waited on, so a
    /// group that needs more tokens than a bucket without an acquire timeout
    /// holds is rejected with `InvalidState` before anything is submitted.
    pub fn run_async(&mut self) -> QueryResult<()> {
        self.check_admission_capacity()?;
        self.started = true;
        info!(jobs = self.jobs.len(), "submitting job group");

        let outcomes: Vec<QueryResult<()>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .jobs
                .iter_mut()
                .filter(|job| *job.state() == JobState::Created)
                .map(|job| scope.spawn(move || job.submit()))
                .collect();
            handles.into_iter().map(joined).collect()
        });

        outcomes.into_iter().collect()
    }

    /// Rows of every member in insertion order, waiting with each member's
    /// default timeout where needed.
    pub fn results(&mut self) -> QueryResult<Vec<Vec<TypedRow>>> {
        self.started = true;
        let timeouts: Vec<_> = self.jobs.iter().map(|job| job.options().default_timeout).collect();
        self.drive(false, &timeouts)
    }

    /// Submit and wait on every member with `timeout`, returning rows in
    /// insertion order.
    ///
    /// Each member waits right after its own submission, so a group larger
    /// than the admission capacity makes progress as members finish.
    pub fn run_sync(&mut self, timeout: Option<Duration>) -> QueryResult<Vec<Vec<TypedRow>>> {
        self.started = true;
        info!(jobs = self.jobs.len(), policy = ?self.policy, "running job group");
        let timeouts = vec![timeout; self.jobs.len()];
        self.drive(true, &timeouts)
    }

    fn drive(&mut self, submit: bool, timeouts: &[Option<Duration>]) -> QueryResult<Vec<Vec<TypedRow>>> {
        let fail_fast = self.policy == FailurePolicy::FailFast;
        let cancel = CancellationToken::new();
        let cancel = &cancel;

        let outcomes: Vec<QueryResult<Vec<TypedRow>>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .jobs
                .iter_mut()
                .zip(timeouts)
                .map(|(job, timeout)| {
                    let job_id = job.id();
                    scope.spawn(move || {
                        let job: &mut Job = job;
                        job.cancel_on_failure(fail_fast.then(|| cancel.clone()));
                        let outcome = run_member(job, submit, *timeout, cancel);
                        job.cancel_on_failure(None);
                        if let Err(e) = &outcome {
                            if fail_fast && !matches!(e, QueryError::Cancelled) {
                                debug!(job_id = %job_id, "cancelling sibling jobs");
                                cancel.cancel();
                            }
                        }
                        outcome
                    })
                })
                .collect();
            handles.into_iter().map(joined).collect()
        });

        in_insertion_order(outcomes)
    }

    /// Reject a `run_async` that would block forever in admission.
    ///
    /// Members still to be submitted and members already holding a token are
    /// counted per bucket.
    fn check_admission_capacity(&self) -> QueryResult<()> {
        let mut needed: Vec<(&Arc<dyn AdmissionController>, usize)> = Vec::new();
        for job in self
            .jobs
            .iter()
            .filter(|job| matches!(job.state(), JobState::Created | JobState::Waiting))
        {
            let controller = job.admission();
            match needed
                .iter_mut()
                .find(|(seen, _)| std::ptr::addr_eq(Arc::as_ptr(*seen), Arc::as_ptr(controller)))
            {
                Some((_, count)) => *count += 1,
                None => needed.push((controller, 1)),
            }
        }

        for (controller, count) in needed {
            if controller.acquire_timeout().is_none() && count > controller.capacity() {
                return Err(QueryError::invalid_state(format!(
                    "{count} jobs cannot all hold tokens of an admission bucket with capacity {}; \
                     use run_sync or set an admission timeout",
                    controller.capacity()
                )));
            }
        }
        Ok(())
    }

    fn ensure_not_started(&self, operation: &str) -> QueryResult<()> {
        if self.started {
            return Err(QueryError::invalid_state(format!(
                "cannot {operation} jobs after the group started"
            )));
        }
        Ok(())
    }
}

fn run_member(
    job: &mut Job,
    submit: bool,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> QueryResult<Vec<TypedRow>> {
    if submit && *job.state() == JobState::Created {
        job.submit_with_cancel(cancel)?;
    }
    job.resolve(timeout, cancel)
}

fn joined<T>(handle: ScopedJoinHandle<'_, QueryResult<T>>) -> QueryResult<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(QueryError::invalid_state("job worker panicked")))
}

/// Rows in order, or the first error that is not a cancellation.
fn in_insertion_order(outcomes: Vec<QueryResult<Vec<TypedRow>>>) -> QueryResult<Vec<Vec<TypedRow>>> {
    let mut results = Vec::with_capacity(outcomes.len());
    let mut cancelled = None;

    for outcome in outcomes {
        match outcome {
            Ok(rows) => results.push(rows),
            Err(QueryError::Cancelled) => {
                cancelled.get_or_insert(QueryError::Cancelled);
            }
            Err(e) => return Err(e),
        }
    }

    match cancelled {
        Some(e) => Err(e),
        None => Ok(results),
    }
}
