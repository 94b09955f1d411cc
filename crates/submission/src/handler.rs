//! Execution handler: the part that runs inside the worker.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use docflow_core::SubmissionId;

use crate::action::SubmissionAction;
use crate::document::{Document, DocumentStore};
use crate::notifier::SubmissionNotifier;
use crate::record::{Outcome, SubmissionState};
use crate::runner::Cancellation;
use crate::store::{Resolution, SubmissionStore, SubmissionStoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Store(#[from] SubmissionStoreError),
}

/// What a handler invocation ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// This invocation wrote the terminal state.
    Resolved(SubmissionState),
    /// The record was already terminal (retry, or the reconciler won the race).
    AlreadyResolved(SubmissionState),
    /// The record no longer exists (purged or rolled back).
    Missing,
    /// The runner gave up on the attempt before the action ran; the record
    /// is left to the reconciler.
    Abandoned,
}

/// Runs a queued document action and records its outcome.
#[derive(Clone)]
pub struct ExecutionHandler {
    submissions: Arc<dyn SubmissionStore>,
    documents: Arc<dyn DocumentStore>,
    notifier: SubmissionNotifier,
}

impl core::fmt::Debug for ExecutionHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExecutionHandler").finish_non_exhaustive()
    }
}

impl ExecutionHandler {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        documents: Arc<dyn DocumentStore>,
        notifier: SubmissionNotifier,
    ) -> Self {
        Self {
            submissions,
            documents,
            notifier,
        }
    }

    /// Execute `action` on `document` for the given submission.
    ///
    /// Document failures are captured into the record, never returned. Only
    /// storage failures surface as `Err`, so the job runner may retry; a retry
    /// against a terminal record is a no-op.
    ///
    /// The action runs under the submission's document lock. If the reconciler
    /// released that lock in the meantime, the document store refuses the
    /// action and the reconciler's verdict stands.
    pub fn execute(
        &self,
        submission_id: SubmissionId,
        document: Document,
        action: SubmissionAction,
        cancellation: &Cancellation,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let Some(record) = self.submissions.get(submission_id)? else {
            warn!(submission_id = %submission_id, "submission record missing; nothing to execute");
            return Ok(ExecutionOutcome::Missing);
        };

        if record.state().is_terminal() {
            info!(
                submission_id = %submission_id,
                state = %record.state(),
                "submission already resolved; skipping"
            );
            return Ok(ExecutionOutcome::AlreadyResolved(record.state()));
        }

        let doc_action = action.normalize();

        // A previous attempt may have committed the action and died before
        // writing the status.
        let already_applied = self
            .documents
            .load(&document.reference)
            .map(|current| current.docstatus == doc_action.target_status())
            .unwrap_or(false);

        let outcome = if already_applied {
            info!(submission_id = %submission_id, "document action already took effect");
            Outcome::Finished
        } else if cancellation.is_cancelled() {
            warn!(submission_id = %submission_id, "attempt cancelled by the job runner; action not run");
            return Ok(ExecutionOutcome::Abandoned);
        } else {
            match doc_action.apply(self.documents.as_ref(), &document, Some(submission_id)) {
                Ok(()) => {
                    info!(
                        submission_id = %submission_id,
                        doctype = %document.doctype(),
                        action = %doc_action,
                        execution_time_secs = record.elapsed(Utc::now()).num_seconds(),
                        enqueued_by = %record.enqueued_by(),
                        "submission finished"
                    );
                    Outcome::Finished
                }
                Err(e) => {
                    warn!(
                        submission_id = %submission_id,
                        doctype = %document.doctype(),
                        action = %doc_action,
                        error = %e,
                        "submission failed"
                    );
                    Outcome::failed(e.to_string())
                }
            }
        };

        let state = outcome.state();
        let ended_at = Utc::now();
        let record = match self.submissions.resolve(submission_id, outcome, ended_at)? {
            Resolution::Applied(record) => record,
            Resolution::AlreadyTerminal(current) => {
                info!(
                    submission_id = %submission_id,
                    state = %current.state(),
                    "submission resolved concurrently; keeping existing state"
                );
                return Ok(ExecutionOutcome::AlreadyResolved(current.state()));
            }
        };

        // Failure keeps the lock until someone investigates and unlocks.
        if state == SubmissionState::Finished {
            if let Err(e) = self.documents.unlock(record.reference(), submission_id) {
                warn!(submission_id = %submission_id, error = %e, "failed to release document lock");
            }
        }

        self.notifier.notify(&record, state, action, ended_at);

        Ok(ExecutionOutcome::Resolved(state))
    }
}
