//! Document store port.
//!
//! Documents are owned by an external store. The submission queue only needs
//! to load them, take and release the advisory lock, and run one of the two
//! workflow operations (submit / cancel).
//!
//! The lock is held on behalf of one submission. While it is held, only that
//! submission may submit or cancel the document; once it is released, a
//! worker still acting for the submission is refused.

use serde::{Deserialize, Serialize};

use docflow_core::{Entity, SubmissionId, ValueObject};

use crate::action::DocumentAction;

/// Workflow status of a submittable document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Draft,
    Submitted,
    Cancelled,
}

impl DocStatus {
    /// Numeric form used by the persisted `docstatus` column (0/1/2).
    pub fn as_i64(&self) -> i64 {
        match self {
            DocStatus::Draft => 0,
            DocStatus::Submitted => 1,
            DocStatus::Cancelled => 2,
        }
    }
}

/// Reference to a document: `doctype` + `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    pub doctype: String,
    pub name: String,
}

impl DocumentRef {
    pub fn new(doctype: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            name: name.into(),
        }
    }
}

impl ValueObject for DocumentRef {}

impl core::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.doctype, self.name)
    }
}

/// Snapshot of a document as captured for replay inside a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub reference: DocumentRef,
    pub docstatus: DocStatus,
    /// Field values; opaque to the queue.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Document {
    pub fn new(reference: DocumentRef, data: serde_json::Value) -> Self {
        Self {
            reference,
            docstatus: DocStatus::Draft,
            data,
        }
    }

    pub fn doctype(&self) -> &str {
        &self.reference.doctype
    }

    pub fn name(&self) -> &str {
        &self.reference.name
    }
}

impl Entity for Document {
    type Id = DocumentRef;

    fn id(&self) -> &Self::Id {
        &self.reference
    }
}

/// Document store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("document not found: {0}")]
    NotFound(DocumentRef),
    #[error("{0} is currently locked and queued for execution")]
    Locked(DocumentRef),
    #[error("lock on {0} was released before the action could run")]
    LockReleased(DocumentRef),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("cannot {action} {reference}: document is {from:?}")]
    InvalidTransition {
        reference: DocumentRef,
        action: DocumentAction,
        from: DocStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Document store capability consumed by the submission queue.
///
/// `submit` and `cancel` are atomic: when they return an error, nothing they
/// attempted is persisted. `holder` names the submission the caller acts for;
/// `None` is a direct edit outside the queue.
pub trait DocumentStore: Send + Sync {
    /// Whether documents of this type may be submitted through the queue.
    ///
    /// Other doctypes can still be submitted, just not in the background.
    fn supports_deferred_submission(&self, doctype: &str) -> bool;

    fn load(&self, reference: &DocumentRef) -> Result<Document, DocumentError>;

    /// Take the advisory lock for `holder`. Fails with [`DocumentError::Locked`] when already held.
    fn lock(&self, reference: &DocumentRef, holder: SubmissionId) -> Result<(), DocumentError>;

    /// Release the lock if `holder` owns it; otherwise a no-op.
    fn unlock(&self, reference: &DocumentRef, holder: SubmissionId) -> Result<(), DocumentError>;

    fn lock_holder(&self, reference: &DocumentRef) -> Result<Option<SubmissionId>, DocumentError>;

    fn is_locked(&self, reference: &DocumentRef) -> Result<bool, DocumentError> {
        Ok(self.lock_holder(reference)?.is_some())
    }

    /// Fails with [`DocumentError::Locked`] when someone else holds the lock,
    /// and with [`DocumentError::LockReleased`] when `holder` no longer does.
    fn submit(&self, document: &Document, holder: Option<SubmissionId>) -> Result<(), DocumentError>;

    fn cancel(&self, document: &Document, holder: Option<SubmissionId>) -> Result<(), DocumentError>;
}

impl DocumentAction {
    /// Run this action against the store on behalf of `holder`.
    pub fn apply(
        &self,
        store: &dyn DocumentStore,
        document: &Document,
        holder: Option<SubmissionId>,
    ) -> Result<(), DocumentError> {
        match self {
            DocumentAction::Submit => store.submit(document, holder),
            DocumentAction::Cancel => store.cancel(document, holder),
        }
    }

    /// Check that the action is a legal transition from the document's status.
    pub fn check_transition(&self, document: &Document) -> Result<(), DocumentError> {
        if document.docstatus == self.required_status() {
            Ok(())
        } else {
            Err(DocumentError::InvalidTransition {
                reference: document.reference.clone(),
                action: *self,
                from: document.docstatus,
            })
        }
    }
}
