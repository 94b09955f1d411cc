//! Infrastructure layer: in-process job runner, stores and notification adapters.
//!
//! Everything here implements a port from `docflow-submission`:
//!
//! - [`jobs::LocalJobRunner`] / [`jobs::JobExecutor`]: `JobRunner` and its worker side
//! - [`documents::InMemoryDocumentStore`]: `DocumentStore`
//! - [`submissions::InMemorySubmissionStore`]: `SubmissionStore`
//! - [`notifications`]: `Notifier` and `UserDirectory`

pub mod documents;
pub mod jobs;
pub mod notifications;
pub mod submissions;

mod integration_tests;
