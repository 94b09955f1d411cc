//! Job runner port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use docflow_core::{JobId, SubmissionId};

use crate::action::SubmissionAction;
use crate::document::Document;

/// Job kind under which submission jobs are dispatched.
pub const SUBMISSION_JOB_KIND: &str = "submission_queue.background_submission";

/// Payload replayed inside the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionJob {
    pub submission_id: SubmissionId,
    pub action: SubmissionAction,
    pub document: Document,
}

/// Status reported by the job runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Finished,
    Failed,
    Canceled,
    Stopped,
    /// Never existed, or already purged from the runner's bookkeeping.
    Unknown,
}

impl JobState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }

    /// Terminated without success.
    pub fn is_abnormal_termination(&self) -> bool {
        matches!(self, JobState::Failed | JobState::Canceled | JobState::Stopped)
    }
}

/// Raised by the job runner when it gives up on a running attempt.
///
/// Clones share one flag: the runner keeps a clone and hands another to the
/// attempt.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Job runner error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobRunnerError {
    #[error("job runner unavailable: {0}")]
    Unavailable(String),
    #[error("job rejected: {0}")]
    Rejected(String),
}

/// Narrow interface onto the asynchronous job infrastructure.
pub trait JobRunner: Send + Sync {
    /// Accept a job for asynchronous execution with a hard timeout.
    fn dispatch(&self, job: SubmissionJob, timeout: Duration) -> Result<JobId, JobRunnerError>;

    fn status(&self, job_id: JobId) -> Result<JobState, JobRunnerError>;

    /// Exception detail captured by the runner, when it has one.
    fn failure_detail(&self, job_id: JobId) -> Result<Option<String>, JobRunnerError>;
}

impl<R> JobRunner for Arc<R>
where
    R: JobRunner + ?Sized,
{
    fn dispatch(&self, job: SubmissionJob, timeout: Duration) -> Result<JobId, JobRunnerError> {
        (**self).dispatch(job, timeout)
    }

    fn status(&self, job_id: JobId) -> Result<JobState, JobRunnerError> {
        (**self).status(job_id)
    }

    fn failure_detail(&self, job_id: JobId) -> Result<Option<String>, JobRunnerError> {
        (**self).failure_detail(job_id)
    }
}
