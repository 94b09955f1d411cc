//! Submission record storage port.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use docflow_core::{JobId, SubmissionId};

use crate::document::DocumentRef;
use crate::record::{Outcome, SubmissionRecord, SubmissionState};

/// Result of a terminal write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// This write moved the record out of `Queued`.
    Applied(SubmissionRecord),
    /// Another writer got there first; the stored record is returned untouched.
    AlreadyTerminal(SubmissionRecord),
}

impl Resolution {
    pub fn record(&self) -> &SubmissionRecord {
        match self {
            Resolution::Applied(r) | Resolution::AlreadyTerminal(r) => r,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Resolution::Applied(_))
    }
}

/// Submission store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionStoreError {
    #[error("submission not found: {0}")]
    NotFound(SubmissionId),
    #[error("submission already exists: {0}")]
    AlreadyExists(SubmissionId),
    #[error("submission {id} already bound to job {existing}")]
    JobAlreadyAssigned { id: SubmissionId, existing: JobId },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable storage for submission records.
///
/// Status writes are field-level and never bump `modified`.
pub trait SubmissionStore: Send + Sync {
    fn insert(&self, record: SubmissionRecord) -> Result<(), SubmissionStoreError>;

    fn get(&self, id: SubmissionId) -> Result<Option<SubmissionRecord>, SubmissionStoreError>;

    /// Remove a record (used when the creating transaction rolls back).
    fn delete(&self, id: SubmissionId) -> Result<(), SubmissionStoreError>;

    /// Write `job_id` without touching any other field.
    fn set_job_id(&self, id: SubmissionId, job_id: JobId) -> Result<(), SubmissionStoreError>;

    /// Compare-and-set from `Queued` to the outcome's terminal state.
    fn resolve(
        &self,
        id: SubmissionId,
        outcome: Outcome,
        ended_at: DateTime<Utc>,
    ) -> Result<Resolution, SubmissionStoreError>;

    /// Most recently modified record for a document, optionally filtered by state.
    fn latest(
        &self,
        reference: &DocumentRef,
        state: Option<SubmissionState>,
    ) -> Result<Option<SubmissionRecord>, SubmissionStoreError>;

    /// Delete records whose `modified` is older than `cutoff`. Returns the count.
    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, SubmissionStoreError>;
}

impl<S> SubmissionStore for Arc<S>
where
    S: SubmissionStore + ?Sized,
{
    fn insert(&self, record: SubmissionRecord) -> Result<(), SubmissionStoreError> {
        (**self).insert(record)
    }

    fn get(&self, id: SubmissionId) -> Result<Option<SubmissionRecord>, SubmissionStoreError> {
        (**self).get(id)
    }

    fn delete(&self, id: SubmissionId) -> Result<(), SubmissionStoreError> {
        (**self).delete(id)
    }

    fn set_job_id(&self, id: SubmissionId, job_id: JobId) -> Result<(), SubmissionStoreError> {
        (**self).set_job_id(id, job_id)
    }

    fn resolve(
        &self,
        id: SubmissionId,
        outcome: Outcome,
        ended_at: DateTime<Utc>,
    ) -> Result<Resolution, SubmissionStoreError> {
        (**self).resolve(id, outcome, ended_at)
    }

    fn latest(
        &self,
        reference: &DocumentRef,
        state: Option<SubmissionState>,
    ) -> Result<Option<SubmissionRecord>, SubmissionStoreError> {
        (**self).latest(reference, state)
    }

    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, SubmissionStoreError> {
        (**self).purge_older_than(cutoff)
    }
}
