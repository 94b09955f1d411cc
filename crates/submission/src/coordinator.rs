//! Queue coordinator: record creation, locking and commit-deferred dispatch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use docflow_core::{JobId, SubmissionId, UserId};

use crate::action::SubmissionAction;
use crate::document::{Document, DocumentError, DocumentStore};
use crate::notifier::desk_link;
use crate::record::{SubmissionRecord, SUBMISSION_DOCTYPE};
use crate::runner::{JobRunner, SubmissionJob};
use crate::store::{SubmissionStore, SubmissionStoreError};
use crate::transaction::Transaction;

/// Synchronous rejection of a queue request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The caller should run the action synchronously instead.
    #[error("{doctype} does not support queued submission")]
    NotEligible { doctype: String },
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Store(#[from] SubmissionStoreError),
}

/// Acknowledgement returned to the user who queued the submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedSubmission {
    pub submission_id: SubmissionId,
    pub message: String,
    pub link: String,
}

impl QueuedSubmission {
    fn new(submission_id: SubmissionId) -> Self {
        let link = desk_link(SUBMISSION_DOCTYPE, &submission_id.to_string());
        Self {
            submission_id,
            message: format!("Queued for Submission. You can track the progress over {link}."),
            link,
        }
    }
}

/// Creates submission records and hands them to the job runner.
#[derive(Clone)]
pub struct Coordinator {
    submissions: Arc<dyn SubmissionStore>,
    documents: Arc<dyn DocumentStore>,
    runner: Arc<dyn JobRunner>,
    job_timeout: Duration,
}

impl core::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Coordinator")
            .field("job_timeout", &self.job_timeout)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        documents: Arc<dyn DocumentStore>,
        runner: Arc<dyn JobRunner>,
        job_timeout: Duration,
    ) -> Self {
        Self {
            submissions,
            documents,
            runner,
            job_timeout,
        }
    }

    /// Queue `action` on `document` within the caller's transaction.
    ///
    /// The record is created and the document locked immediately. The job is
    /// dispatched only when `tx` commits; a rollback deletes the record and
    /// releases the lock.
    pub fn enqueue(
        &self,
        tx: &mut Transaction,
        document: Document,
        action: SubmissionAction,
        actor: UserId,
    ) -> Result<QueuedSubmission, QueueError> {
        if !self.documents.supports_deferred_submission(document.doctype()) {
            return Err(QueueError::NotEligible {
                doctype: document.doctype().to_string(),
            });
        }

        action.normalize().check_transition(&document)?;

        let record = SubmissionRecord::new(document.reference.clone(), action, actor, Utc::now());
        let submission_id = record.id_typed();

        // Lock first: a queued record never exists without its lock.
        self.documents.lock(&document.reference, submission_id)?;
        if let Err(e) = self.submissions.insert(record) {
            if let Err(cleanup) = self.documents.unlock(&document.reference, submission_id) {
                error!(submission_id = %submission_id, error = %cleanup, "failed to release lock after insert failure");
            }
            return Err(e.into());
        }

        let submissions = self.submissions.clone();
        let documents = self.documents.clone();
        let reference = document.reference.clone();
        tx.on_rollback(move || {
            if let Err(e) = documents.unlock(&reference, submission_id) {
                warn!(submission_id = %submission_id, error = %e, "failed to release lock on rollback");
            }
            if let Err(e) = submissions.delete(submission_id) {
                warn!(submission_id = %submission_id, error = %e, "failed to remove record on rollback");
            }
        });

        let submissions = self.submissions.clone();
        let runner = self.runner.clone();
        let timeout = self.job_timeout;
        let job = SubmissionJob {
            submission_id,
            action,
            document,
        };
        tx.after_commit(move || {
            dispatch(runner.as_ref(), submissions.as_ref(), job, timeout);
        });

        info!(
            submission_id = %submission_id,
            action = %action,
            enqueued_by = %actor,
            "submission queued"
        );

        Ok(QueuedSubmission::new(submission_id))
    }
}

/// Hand the job to the runner and record its id.
///
/// A runner failure leaves the record `Queued` without a job; the reconciler
/// picks that up later.
pub(crate) fn dispatch(
    runner: &dyn JobRunner,
    submissions: &dyn SubmissionStore,
    job: SubmissionJob,
    timeout: Duration,
) -> Option<JobId> {
    let submission_id = job.submission_id;

    let job_id = match runner.dispatch(job, timeout) {
        Ok(job_id) => job_id,
        Err(e) => {
            warn!(
                submission_id = %submission_id,
                error = %e,
                "dispatch failed; submission stays queued without a job"
            );
            return None;
        }
    };

    if let Err(e) = submissions.set_job_id(submission_id, job_id) {
        error!(submission_id = %submission_id, job_id = %job_id, error = %e, "failed to record job id");
    } else {
        info!(submission_id = %submission_id, job_id = %job_id, "submission dispatched");
    }

    Some(job_id)
}
