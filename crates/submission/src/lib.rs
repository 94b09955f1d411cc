//! `docflow-submission`: background submission queue.
//!
//! Defers a document's submit/cancel to a worker, tracks the attempt in a
//! [`SubmissionRecord`], and keeps the document's advisory lock consistent
//! with the job's fate.
//!
//! ## Flow
//!
//! ```text
//! Coordinator::enqueue ── record (Queued) + lock ── tx.commit ──> JobRunner::dispatch
//!                                                                      │
//!                                              ExecutionHandler::execute (worker)
//!                                                   │ resolve (CAS) ── unlock on success ── notify
//!
//! Reconciler::reconcile (on demand) ── JobRunner::status ── unlock ── resolve (CAS)
//! ```
//!
//! Collaborators (document store, job runner, notifier, record storage) are
//! traits; `docflow-infra` provides in-process implementations.

pub mod action;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod handler;
pub mod notifier;
pub mod queue;
pub mod reconciler;
pub mod record;
pub mod runner;
pub mod store;
pub mod transaction;

pub use action::{DocumentAction, SubmissionAction};
pub use config::{ConfigError, SubmissionQueueConfig};
pub use coordinator::{Coordinator, QueueError, QueuedSubmission};
pub use document::{DocStatus, Document, DocumentError, DocumentRef, DocumentStore};
pub use handler::{ExecutionError, ExecutionHandler, ExecutionOutcome};
pub use notifier::{
    Channel, Indicator, NotificationLog, Notifier, NotifyError, RealtimeAlert, SubmissionNotifier,
    UserDirectory,
};
pub use queue::{LatestSubmissions, SubmissionContext, SubmissionQueue, SubmitOutcome};
pub use reconciler::{ReconcileError, ReconcileOutcome, Reconciler};
pub use record::{Outcome, SubmissionRecord, SubmissionState, SUBMISSION_DOCTYPE};
pub use runner::{
    Cancellation, JobRunner, JobRunnerError, JobState, SubmissionJob, SUBMISSION_JOB_KIND,
};
pub use store::{Resolution, SubmissionStore, SubmissionStoreError};
pub use transaction::Transaction;
