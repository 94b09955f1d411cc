//! Submission record: the durable state machine for one deferred submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docflow_core::{DomainError, DomainResult, Entity, JobId, SubmissionId, UserId};

use crate::action::SubmissionAction;
use crate::document::DocumentRef;

/// Display name of the record type, used in links and notifications.
pub const SUBMISSION_DOCTYPE: &str = "Submission Queue";

/// Submission lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionState {
    /// Waiting for (or running in) a worker
    Queued,
    /// Document action completed
    Finished,
    /// Document action failed or the job terminated abnormally
    Failed,
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionState::Finished | SubmissionState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::Queued => "Queued",
            SubmissionState::Finished => "Finished",
            SubmissionState::Failed => "Failed",
        }
    }
}

impl core::fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome written once per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Finished,
    Failed { detail: Option<String> },
}

impl Outcome {
    pub fn failed(detail: impl Into<String>) -> Self {
        Outcome::Failed {
            detail: Some(detail.into()),
        }
    }

    pub fn state(&self) -> SubmissionState {
        match self {
            Outcome::Finished => SubmissionState::Finished,
            Outcome::Failed { .. } => SubmissionState::Failed,
        }
    }
}

/// One deferred submission attempt.
///
/// Fields are private so the invariants hold for every observed value:
/// - `job_id` is assigned at most once
/// - `ended_at` is set iff the state is terminal
/// - `failure_detail` is set only when the state is `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    id: SubmissionId,
    reference: DocumentRef,
    action: SubmissionAction,
    state: SubmissionState,
    job_id: Option<JobId>,
    enqueued_by: UserId,
    created_at: DateTime<Utc>,
    /// Never bumped by status writes; retention and "latest" queries order by it.
    modified: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    failure_detail: Option<String>,
}

impl SubmissionRecord {
    /// Create a new `Queued` record.
    pub fn new(
        reference: DocumentRef,
        action: SubmissionAction,
        enqueued_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubmissionId::new(),
            reference,
            action,
            state: SubmissionState::Queued,
            job_id: None,
            enqueued_by,
            created_at,
            modified: created_at,
            ended_at: None,
            failure_detail: None,
        }
    }

    pub fn id_typed(&self) -> SubmissionId {
        self.id
    }

    pub fn reference(&self) -> &DocumentRef {
        &self.reference
    }

    pub fn action(&self) -> SubmissionAction {
        self.action
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    pub fn enqueued_by(&self) -> UserId {
        self.enqueued_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn failure_detail(&self) -> Option<&str> {
        self.failure_detail.as_deref()
    }

    /// Time elapsed since creation, clamped at zero.
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.created_at).max(chrono::Duration::zero())
    }

    /// Record the job accepted by the runner.
    ///
    /// Re-assigning the same id is a no-op; a different id is a conflict.
    pub fn assign_job(&mut self, job_id: JobId) -> DomainResult<()> {
        match self.job_id {
            None => {
                self.job_id = Some(job_id);
                Ok(())
            }
            Some(existing) if existing == job_id => Ok(()),
            Some(existing) => Err(DomainError::conflict(format!(
                "submission {} already bound to job {existing}",
                self.id
            ))),
        }
    }

    /// Move to a terminal state. Only legal from `Queued`.
    pub fn resolve(&mut self, outcome: Outcome, ended_at: DateTime<Utc>) -> DomainResult<()> {
        if self.state.is_terminal() {
            return Err(DomainError::invariant(format!(
                "submission {} is already {}",
                self.id, self.state
            )));
        }

        match outcome {
            Outcome::Finished => {
                self.state = SubmissionState::Finished;
                self.failure_detail = None;
            }
            Outcome::Failed { detail } => {
                self.state = SubmissionState::Failed;
                self.failure_detail = detail;
            }
        }
        self.ended_at = Some(ended_at);
        Ok(())
    }
}

impl Entity for SubmissionRecord {
    type Id = SubmissionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
