//! In-memory submission record store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use docflow_core::{JobId, SubmissionId};
use docflow_submission::{
    DocumentRef, Outcome, Resolution, SubmissionRecord, SubmissionState, SubmissionStore,
    SubmissionStoreError,
};

/// In-memory submission store for tests/dev.
///
/// Every write happens under one write lock, which makes `resolve` a true
/// compare-and-set.
#[derive(Debug, Default)]
pub struct InMemorySubmissionStore {
    records: RwLock<HashMap<SubmissionId, SubmissionRecord>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> SubmissionStoreError {
    SubmissionStoreError::Storage("submission store lock poisoned".to_string())
}

impl SubmissionStore for InMemorySubmissionStore {
    fn insert(&self, record: SubmissionRecord) -> Result<(), SubmissionStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let id = record.id_typed();
        if records.contains_key(&id) {
            return Err(SubmissionStoreError::AlreadyExists(id));
        }
        records.insert(id, record);
        Ok(())
    }

    fn get(&self, id: SubmissionId) -> Result<Option<SubmissionRecord>, SubmissionStoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(&id).cloned())
    }

    fn delete(&self, id: SubmissionId) -> Result<(), SubmissionStoreError> {
        self.records.write().map_err(poisoned)?.remove(&id);
        Ok(())
    }

    fn set_job_id(&self, id: SubmissionId, job_id: JobId) -> Result<(), SubmissionStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let record = records.get_mut(&id).ok_or(SubmissionStoreError::NotFound(id))?;

        match record.job_id() {
            Some(existing) if existing != job_id => {
                Err(SubmissionStoreError::JobAlreadyAssigned { id, existing })
            }
            _ => record
                .assign_job(job_id)
                .map_err(|e| SubmissionStoreError::Storage(e.to_string())),
        }
    }

    fn resolve(
        &self,
        id: SubmissionId,
        outcome: Outcome,
        ended_at: DateTime<Utc>,
    ) -> Result<Resolution, SubmissionStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let record = records.get_mut(&id).ok_or(SubmissionStoreError::NotFound(id))?;

        if record.state().is_terminal() {
            return Ok(Resolution::AlreadyTerminal(record.clone()));
        }

        record
            .resolve(outcome, ended_at)
            .map_err(|e| SubmissionStoreError::Storage(e.to_string()))?;
        Ok(Resolution::Applied(record.clone()))
    }

    fn latest(
        &self,
        reference: &DocumentRef,
        state: Option<SubmissionState>,
    ) -> Result<Option<SubmissionRecord>, SubmissionStoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .values()
            .filter(|r| r.reference() == reference && state.is_none_or(|s| r.state() == s))
            .max_by_key(|r| (r.modified(), *r.id_typed().as_uuid()))
            .cloned())
    }

    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, SubmissionStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let before = records.len();
        records.retain(|_, r| r.modified() >= cutoff);
        Ok(before - records.len())
    }
}
