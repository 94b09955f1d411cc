//! Job runner backed by the local job store.
//!
//! `LocalJobRunner` is the dispatch/status side used by the submission
//! queue; a [`JobExecutor`](super::JobExecutor) with
//! [`submission_job_handler`] registered is the worker side. Both share the
//! same store.

use std::time::Duration;

use tracing::debug;

use docflow_core::JobId;
use docflow_submission::{
    Cancellation, ExecutionHandler, ExecutionOutcome, JobRunner, JobRunnerError, JobState,
    SubmissionJob, SUBMISSION_JOB_KIND,
};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobKind, JobResult, JobStatus, RetryPolicy};

/// Map a stored job status onto the runner's status vocabulary.
///
/// A job waiting for a retry is still queued from the caller's point of view.
pub fn job_state(status: &JobStatus) -> JobState {
    match status {
        JobStatus::Pending | JobStatus::Failed { .. } => JobState::Queued,
        JobStatus::Running => JobState::Running,
        JobStatus::Completed => JobState::Finished,
        JobStatus::DeadLettered { .. } => JobState::Failed,
        JobStatus::Cancelled => JobState::Canceled,
        JobStatus::Stopped { .. } => JobState::Stopped,
    }
}

fn unavailable(e: JobStoreError) -> JobRunnerError {
    JobRunnerError::Unavailable(e.to_string())
}

/// In-process job runner.
#[derive(Debug, Clone)]
pub struct LocalJobRunner<S: JobStore> {
    store: S,
    retry_policy: RetryPolicy,
}

impl<S: JobStore> LocalJobRunner<S> {
    /// Submission jobs are not retried by default; the reconciler repairs
    /// anything left behind.
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry_policy: RetryPolicy::no_retry(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Cancel a job that has not started yet. Returns whether it was cancelled.
    pub fn cancel(&self, job_id: JobId) -> Result<bool, JobRunnerError> {
        let Some(mut job) = self.store.get(job_id).map_err(unavailable)? else {
            return Ok(false);
        };
        if !matches!(job.status, JobStatus::Pending | JobStatus::Failed { .. }) {
            return Ok(false);
        }
        job.mark_cancelled();
        self.store.update(&job).map_err(unavailable)?;
        Ok(true)
    }
}

impl<S: JobStore> JobRunner for LocalJobRunner<S> {
    fn dispatch(&self, job: SubmissionJob, timeout: Duration) -> Result<JobId, JobRunnerError> {
        let payload = serde_json::to_value(&job).map_err(|e| JobRunnerError::Rejected(e.to_string()))?;
        let job = Job::new(JobKind::new(SUBMISSION_JOB_KIND), payload)
            .with_timeout(timeout)
            .with_retry_policy(self.retry_policy.clone());

        let job_id = self.store.enqueue(job).map_err(unavailable)?;
        debug!(job_id = %job_id, timeout_secs = timeout.as_secs(), "submission job enqueued");
        Ok(job_id)
    }

    fn status(&self, job_id: JobId) -> Result<JobState, JobRunnerError> {
        if let Some(job) = self.store.get(job_id).map_err(unavailable)? {
            return Ok(job_state(&job.status));
        }
        match self.store.dead_letter_entry(job_id).map_err(unavailable)? {
            Some(_) => Ok(JobState::Failed),
            None => Ok(JobState::Unknown),
        }
    }

    fn failure_detail(&self, job_id: JobId) -> Result<Option<String>, JobRunnerError> {
        if let Some(entry) = self.store.dead_letter_entry(job_id).map_err(unavailable)? {
            return Ok(Some(entry.reason));
        }
        let detail = self
            .store
            .get(job_id)
            .map_err(unavailable)?
            .filter(|job| job_state(&job.status).is_abnormal_termination())
            .and_then(|job| job.last_error().map(str::to_string));
        Ok(detail)
    }
}

/// Worker-side handler for submission jobs.
///
/// Document failures are already captured in the submission record, so they
/// complete the job. Only storage errors fail it.
pub fn submission_job_handler(
    handler: ExecutionHandler,
) -> impl Fn(&Job, &Cancellation) -> JobResult + Send + Sync + 'static {
    move |job: &Job, cancellation: &Cancellation| {
        let payload: SubmissionJob = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => return JobResult::Failure(format!("invalid submission payload: {e}")),
        };

        let result = handler.execute(
            payload.submission_id,
            payload.document,
            payload.action,
            cancellation,
        );
        match result {
            Ok(ExecutionOutcome::Missing) => {
                debug!(job_id = %job.id, "submission record gone; nothing to do");
                JobResult::Success
            }
            Ok(outcome) => {
                debug!(job_id = %job.id, ?outcome, "submission job done");
                JobResult::Success
            }
            Err(e) => JobResult::Failure(e.to_string()),
        }
    }
}
