//! Reconciler: repairs submissions whose worker never reported back.
//!
//! The execution handler's write path can be skipped entirely (worker killed,
//! infrastructure failure, dispatch that never happened), leaving the record
//! `Queued` and the document locked. The reconciler compares the record with
//! the job runner's view and breaks that deadlock. It is safe to call
//! speculatively and repeatedly.
//!
//! Unless the job is still in flight, the submission's lock is released
//! first. From then on no attempt acting for the submission can change the
//! document, so its persisted status decides the outcome:
//!
//! | job runner says               | action took effect | result                      |
//! |-------------------------------|--------------------|-----------------------------|
//! | queued / running              | (not read)         | nothing; still in flight    |
//! | anything else                 | yes                | `Finished`                  |
//! | unknown (or never dispatched) | no                 | `Failed`                    |
//! | failed / canceled / stopped   | no                 | `Failed` with runner detail |
//! | finished                      | no                 | `Failed`                    |
//!
//! Terminal writes go through the store's compare-and-set, so a record the
//! handler already resolved is never overwritten.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use docflow_core::SubmissionId;

use crate::document::{DocStatus, DocumentError, DocumentStore};
use crate::record::{Outcome, SubmissionRecord, SubmissionState};
use crate::runner::{JobRunner, JobRunnerError, JobState};
use crate::store::{Resolution, SubmissionStore, SubmissionStoreError};

/// Result reported back to the user who asked for the unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The job is still queued or running; nothing changed.
    InFlight { job_state: JobState },
    /// The lock was released; `state` is the record's terminal state.
    Unlocked { state: SubmissionState },
    /// Nothing left to do.
    AlreadyResolved { state: SubmissionState },
}

impl ReconcileOutcome {
    /// Message shown to the user; resolved submissions report nothing.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            ReconcileOutcome::InFlight { .. } => Some("Document in queue for execution!"),
            ReconcileOutcome::Unlocked { .. } => Some("Document Unlocked"),
            ReconcileOutcome::AlreadyResolved { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("submission not found: {0}")]
    NotFound(SubmissionId),
    #[error(transparent)]
    Store(#[from] SubmissionStoreError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Runner(#[from] JobRunnerError),
}

#[derive(Clone)]
pub struct Reconciler {
    submissions: Arc<dyn SubmissionStore>,
    documents: Arc<dyn DocumentStore>,
    runner: Arc<dyn JobRunner>,
}

impl core::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        documents: Arc<dyn DocumentStore>,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        Self {
            submissions,
            documents,
            runner,
        }
    }

    pub fn reconcile(&self, submission_id: SubmissionId) -> Result<ReconcileOutcome, ReconcileError> {
        let record = self
            .submissions
            .get(submission_id)?
            .ok_or(ReconcileError::NotFound(submission_id))?;

        if record.state().is_terminal() {
            return self.release_terminal(&record);
        }

        // Runner status is read before the document, never after.
        let job_state = match record.job_id() {
            Some(job_id) => self.runner.status(job_id)?,
            None => JobState::Unknown,
        };

        if job_state.is_in_flight() {
            info!(submission_id = %submission_id, ?job_state, "submission still in flight");
            return Ok(ReconcileOutcome::InFlight { job_state });
        }

        self.release(&record)?;

        let expected = record.action().normalize().target_status();
        let docstatus = self.docstatus(&record)?;
        let outcome = if docstatus == Some(expected) {
            Outcome::Finished
        } else {
            match job_state {
                JobState::Finished => Outcome::failed(format!(
                    "job finished but {} is {}; {} never took effect",
                    record.reference(),
                    docstatus.map_or_else(|| "missing".to_string(), |s| format!("{s:?}")),
                    record.action()
                )),
                JobState::Unknown => Outcome::failed(match record.job_id() {
                    Some(job_id) => format!("job {job_id} is unknown to the job runner"),
                    None => "submission was never dispatched to the job runner".to_string(),
                }),
                _ => Outcome::Failed {
                    detail: self.runner_detail(&record),
                },
            }
        };

        self.settle(&record, outcome)
    }

    fn runner_detail(&self, record: &SubmissionRecord) -> Option<String> {
        let job_id = record.job_id()?;
        match self.runner.failure_detail(job_id) {
            Ok(detail) => detail,
            Err(e) => {
                warn!(submission_id = %record.id_typed(), error = %e, "could not fetch job failure detail");
                None
            }
        }
    }

    /// Persisted status of the record's document; `None` once it is gone.
    fn docstatus(&self, record: &SubmissionRecord) -> Result<Option<DocStatus>, ReconcileError> {
        match self.documents.load(record.reference()) {
            Ok(document) => Ok(Some(document.docstatus)),
            Err(DocumentError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Terminal write; the lock is already released.
    fn settle(
        &self,
        record: &SubmissionRecord,
        outcome: Outcome,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let submission_id = record.id_typed();
        match self.submissions.resolve(submission_id, outcome, Utc::now())? {
            Resolution::Applied(updated) => {
                info!(
                    submission_id = %submission_id,
                    state = %updated.state(),
                    "submission reconciled; document unlocked"
                );
                Ok(ReconcileOutcome::Unlocked {
                    state: updated.state(),
                })
            }
            Resolution::AlreadyTerminal(current) => {
                info!(
                    submission_id = %submission_id,
                    state = %current.state(),
                    "submission resolved concurrently; keeping existing state"
                );
                Ok(ReconcileOutcome::AlreadyResolved {
                    state: current.state(),
                })
            }
        }
    }

    /// A terminal record may still hold the lock (failed executions keep it).
    /// A lock held by another submission is left alone.
    fn release_terminal(&self, record: &SubmissionRecord) -> Result<ReconcileOutcome, ReconcileError> {
        let state = record.state();

        let holder = match self.documents.lock_holder(record.reference()) {
            Ok(holder) => holder,
            Err(DocumentError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        if holder != Some(record.id_typed()) {
            return Ok(ReconcileOutcome::AlreadyResolved { state });
        }

        self.release(record)?;
        info!(submission_id = %record.id_typed(), %state, "released lock of resolved submission");
        Ok(ReconcileOutcome::Unlocked { state })
    }

    fn release(&self, record: &SubmissionRecord) -> Result<(), ReconcileError> {
        match self.documents.unlock(record.reference(), record.id_typed()) {
            Ok(()) | Err(DocumentError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
