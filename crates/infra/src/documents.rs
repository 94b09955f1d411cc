//! In-memory document store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use docflow_core::SubmissionId;
use docflow_submission::{DocStatus, Document, DocumentAction, DocumentError, DocumentRef, DocumentStore};

/// Validation hook run before a submit or cancel is persisted.
pub type Validator = Arc<dyn Fn(&Document, DocumentAction) -> Result<(), String> + Send + Sync>;

/// Per-doctype settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocTypeSettings {
    /// Submit/cancel may be deferred to a background job.
    pub deferred_submission: bool,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    document: Document,
    lock_holder: Option<SubmissionId>,
}

/// In-memory document store for tests/dev.
///
/// `submit` and `cancel` run validators first and only then check the
/// advisory lock and flip the status under the write lock, so a failing
/// validator leaves nothing behind and a lock released while validators ran
/// is still honoured.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    doctypes: RwLock<HashMap<String, DocTypeSettings>>,
    validators: RwLock<HashMap<String, Vec<Validator>>>,
    documents: RwLock<HashMap<DocumentRef, StoredDocument>>,
}

impl core::fmt::Debug for InMemoryDocumentStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryDocumentStore").finish_non_exhaustive()
    }
}

fn poisoned<T>(_: T) -> DocumentError {
    DocumentError::Storage("document store lock poisoned".to_string())
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn register_doctype(&self, doctype: impl Into<String>, settings: DocTypeSettings) {
        if let Ok(mut doctypes) = self.doctypes.write() {
            doctypes.insert(doctype.into(), settings);
        }
    }

    /// Add a validator for a doctype. Validators run in registration order.
    pub fn add_validator<F>(&self, doctype: impl Into<String>, validator: F)
    where
        F: Fn(&Document, DocumentAction) -> Result<(), String> + Send + Sync + 'static,
    {
        if let Ok(mut validators) = self.validators.write() {
            validators.entry(doctype.into()).or_default().push(Arc::new(validator));
        }
    }

    /// Store a new document.
    pub fn insert(&self, document: Document) -> Result<(), DocumentError> {
        let mut documents = self.documents.write().map_err(poisoned)?;
        if documents.contains_key(&document.reference) {
            return Err(DocumentError::Validation(format!(
                "{} already exists",
                document.reference
            )));
        }
        documents.insert(
            document.reference.clone(),
            StoredDocument {
                document,
                lock_holder: None,
            },
        );
        Ok(())
    }

    /// Save field changes to a draft. Locked documents refuse edits.
    pub fn save(&self, document: &Document) -> Result<(), DocumentError> {
        let mut documents = self.documents.write().map_err(poisoned)?;
        let stored = documents
            .get_mut(&document.reference)
            .ok_or_else(|| DocumentError::NotFound(document.reference.clone()))?;

        if stored.lock_holder.is_some() {
            return Err(DocumentError::Locked(document.reference.clone()));
        }
        if stored.document.docstatus != DocStatus::Draft {
            return Err(DocumentError::Validation(format!(
                "cannot edit {}: document is {:?}",
                document.reference, stored.document.docstatus
            )));
        }

        stored.document.data = document.data.clone();
        Ok(())
    }

    fn validate(&self, document: &Document, action: DocumentAction) -> Result<(), DocumentError> {
        let validators: Vec<Validator> = self
            .validators
            .read()
            .map_err(poisoned)?
            .get(document.doctype())
            .cloned()
            .unwrap_or_default();

        validators
            .iter()
            .try_for_each(|validate| validate(document, action))
            .map_err(DocumentError::Validation)
    }

    fn transition(
        &self,
        document: &Document,
        action: DocumentAction,
        holder: Option<SubmissionId>,
    ) -> Result<(), DocumentError> {
        self.validate(document, action)?;

        let mut documents = self.documents.write().map_err(poisoned)?;
        let stored = documents
            .get_mut(&document.reference)
            .ok_or_else(|| DocumentError::NotFound(document.reference.clone()))?;

        match (stored.lock_holder, holder) {
            (current, Some(holder)) if current != Some(holder) => {
                return Err(DocumentError::LockReleased(document.reference.clone()));
            }
            (Some(_), None) => return Err(DocumentError::Locked(document.reference.clone())),
            _ => {}
        }
        action.check_transition(&stored.document)?;

        stored.document.data = document.data.clone();
        stored.document.docstatus = action.target_status();
        debug!(document = %document.reference, %action, "document transitioned");
        Ok(())
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn supports_deferred_submission(&self, doctype: &str) -> bool {
        self.doctypes
            .read()
            .ok()
            .and_then(|doctypes| doctypes.get(doctype).copied())
            .is_some_and(|settings| settings.deferred_submission)
    }

    fn load(&self, reference: &DocumentRef) -> Result<Document, DocumentError> {
        let documents = self.documents.read().map_err(poisoned)?;
        documents
            .get(reference)
            .map(|stored| stored.document.clone())
            .ok_or_else(|| DocumentError::NotFound(reference.clone()))
    }

    fn lock(&self, reference: &DocumentRef, holder: SubmissionId) -> Result<(), DocumentError> {
        let mut documents = self.documents.write().map_err(poisoned)?;
        let stored = documents
            .get_mut(reference)
            .ok_or_else(|| DocumentError::NotFound(reference.clone()))?;

        if stored.lock_holder.is_some() {
            return Err(DocumentError::Locked(reference.clone()));
        }
        stored.lock_holder = Some(holder);
        Ok(())
    }

    fn unlock(&self, reference: &DocumentRef, holder: SubmissionId) -> Result<(), DocumentError> {
        let mut documents = self.documents.write().map_err(poisoned)?;
        let stored = documents
            .get_mut(reference)
            .ok_or_else(|| DocumentError::NotFound(reference.clone()))?;

        if stored.lock_holder == Some(holder) {
            stored.lock_holder = None;
        }
        Ok(())
    }

    fn lock_holder(&self, reference: &DocumentRef) -> Result<Option<SubmissionId>, DocumentError> {
        let documents = self.documents.read().map_err(poisoned)?;
        documents
            .get(reference)
            .map(|stored| stored.lock_holder)
            .ok_or_else(|| DocumentError::NotFound(reference.clone()))
    }

    fn submit(&self, document: &Document, holder: Option<SubmissionId>) -> Result<(), DocumentError> {
        self.transition(document, DocumentAction::Submit, holder)
    }

    fn cancel(&self, document: &Document, holder: Option<SubmissionId>) -> Result<(), DocumentError> {
        self.transition(document, DocumentAction::Cancel, holder)
    }
}
