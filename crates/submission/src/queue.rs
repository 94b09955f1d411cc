//! `SubmissionQueue`: the operations exposed to callers.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use docflow_core::{SubmissionId, UserId};

use crate::action::SubmissionAction;
use crate::config::SubmissionQueueConfig;
use crate::coordinator::{Coordinator, QueueError, QueuedSubmission};
use crate::document::{Document, DocumentRef, DocumentStore};
use crate::handler::ExecutionHandler;
use crate::notifier::SubmissionNotifier;
use crate::reconciler::{ReconcileError, ReconcileOutcome, Reconciler};
use crate::record::{SubmissionRecord, SubmissionState};
use crate::runner::JobRunner;
use crate::store::{SubmissionStore, SubmissionStoreError};
use crate::transaction::Transaction;

/// Collaborators shared by every part of the queue.
#[derive(Clone)]
pub struct SubmissionContext {
    pub submissions: Arc<dyn SubmissionStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub runner: Arc<dyn JobRunner>,
    pub notifier: SubmissionNotifier,
    pub config: SubmissionQueueConfig,
}

/// Latest submission ids for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestSubmissions {
    pub latest_submission: Option<SubmissionId>,
    pub latest_failed_submission: Option<SubmissionId>,
}

/// What `submit_or_queue` did with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued(QueuedSubmission),
    /// The doctype is not queued in the background; the action ran inline.
    Executed,
}

/// Facade over coordinator, handler and reconciler.
#[derive(Clone)]
pub struct SubmissionQueue {
    ctx: SubmissionContext,
    coordinator: Coordinator,
    handler: ExecutionHandler,
    reconciler: Reconciler,
}

impl core::fmt::Debug for SubmissionQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubmissionQueue")
            .field("config", &self.ctx.config)
            .finish_non_exhaustive()
    }
}

impl SubmissionQueue {
    pub fn new(ctx: SubmissionContext) -> Self {
        let coordinator = Coordinator::new(
            ctx.submissions.clone(),
            ctx.documents.clone(),
            ctx.runner.clone(),
            ctx.config.job_timeout,
        );
        let handler = ExecutionHandler::new(
            ctx.submissions.clone(),
            ctx.documents.clone(),
            ctx.notifier.clone(),
        );
        let reconciler = Reconciler::new(
            ctx.submissions.clone(),
            ctx.documents.clone(),
            ctx.runner.clone(),
        );

        Self {
            ctx,
            coordinator,
            handler,
            reconciler,
        }
    }

    pub fn config(&self) -> &SubmissionQueueConfig {
        &self.ctx.config
    }

    /// Handler to register with the worker side of the job runner.
    pub fn execution_handler(&self) -> ExecutionHandler {
        self.handler.clone()
    }

    /// Queue a submission; rejects doctypes that are not queued in the background.
    pub fn queue_submission(
        &self,
        tx: &mut Transaction,
        document: Document,
        action: SubmissionAction,
        actor: UserId,
    ) -> Result<QueuedSubmission, QueueError> {
        self.coordinator.enqueue(tx, document, action, actor)
    }

    /// Queue when the doctype allows it, otherwise run the action inline.
    pub fn submit_or_queue(
        &self,
        tx: &mut Transaction,
        document: Document,
        action: SubmissionAction,
        actor: UserId,
    ) -> Result<SubmitOutcome, QueueError> {
        if self.ctx.documents.supports_deferred_submission(document.doctype()) {
            return self
                .coordinator
                .enqueue(tx, document, action, actor)
                .map(SubmitOutcome::Queued);
        }

        let doc_action = action.normalize();
        doc_action.check_transition(&document)?;
        doc_action.apply(self.ctx.documents.as_ref(), &document, None)?;
        info!(
            doctype = %document.doctype(),
            name = %document.name(),
            action = %doc_action,
            "document action executed synchronously"
        );
        Ok(SubmitOutcome::Executed)
    }

    /// User-triggered unlock; runs the reconciler.
    pub fn unlock_submission(&self, id: SubmissionId) -> Result<ReconcileOutcome, ReconcileError> {
        self.reconciler.reconcile(id)
    }

    pub fn get(&self, id: SubmissionId) -> Result<Option<SubmissionRecord>, SubmissionStoreError> {
        self.ctx.submissions.get(id)
    }

    pub fn latest_submissions(
        &self,
        reference: &DocumentRef,
    ) -> Result<LatestSubmissions, SubmissionStoreError> {
        let latest = self.ctx.submissions.latest(reference, None)?;
        let latest_failed = self
            .ctx
            .submissions
            .latest(reference, Some(SubmissionState::Failed))?;

        Ok(LatestSubmissions {
            latest_submission: latest.map(|r| r.id_typed()),
            latest_failed_submission: latest_failed.map(|r| r.id_typed()),
        })
    }

    /// Delete records not modified within the last `days` days.
    ///
    /// A window reaching past the earliest representable date purges nothing.
    pub fn purge_records_older_than(&self, days: u32) -> Result<usize, SubmissionStoreError> {
        let cutoff = chrono::Duration::try_days(i64::from(days))
            .and_then(|window| Utc::now().checked_sub_signed(window));
        let Some(cutoff) = cutoff else {
            info!(days, "retention window exceeds the calendar; nothing to purge");
            return Ok(0);
        };
        let purged = self.ctx.submissions.purge_older_than(cutoff)?;
        info!(days, purged, "purged old submission records");
        Ok(purged)
    }

    /// Purge with the configured retention.
    pub fn clear_old_records(&self) -> Result<usize, SubmissionStoreError> {
        self.purge_records_older_than(self.ctx.config.retention_days)
    }
}
