use super::SubmissionStore;
use crate::error::{SubmissionError, SubmissionResult};
use crate::study::{Payload, Study};
use ssv_callback_id::CallbackId;
use ssv_types::StudyId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-process store backed by two lock-guarded maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    payloads: RwLock<HashMap<CallbackId, Payload>>,
    studies: RwLock<HashMap<StudyId, Study>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn payloads(&self) -> SubmissionResult<RwLockReadGuard<'_, HashMap<CallbackId, Payload>>> {
        self.payloads.read().map_err(|_| poisoned())
    }

    fn payloads_mut(
        &self,
    ) -> SubmissionResult<RwLockWriteGuard<'_, HashMap<CallbackId, Payload>>> {
        self.payloads.write().map_err(|_| poisoned())
    }

    fn studies(&self) -> SubmissionResult<RwLockReadGuard<'_, HashMap<StudyId, Study>>> {
        self.studies.read().map_err(|_| poisoned())
    }

    fn studies_mut(&self) -> SubmissionResult<RwLockWriteGuard<'_, HashMap<StudyId, Study>>> {
        self.studies.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> SubmissionError {
    SubmissionError::StoreUnavailable("memory store lock poisoned".into())
}

impl SubmissionStore for MemoryStore {
    fn reserve_callback(&self, callback_id: &CallbackId) -> SubmissionResult<bool> {
        match self.payloads_mut()?.entry(callback_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Payload::reserved(callback_id.clone()));
                Ok(true)
            }
        }
    }

    fn find_payload(&self, callback_id: &CallbackId) -> SubmissionResult<Option<Payload>> {
        Ok(self.payloads()?.get(callback_id).cloned())
    }

    fn find_payloads(&self) -> SubmissionResult<Vec<Payload>> {
        Ok(self.payloads()?.values().cloned().collect())
    }

    fn replace_payload(&self, payload: &Payload) -> SubmissionResult<()> {
        match self.payloads_mut()?.get_mut(&payload.callback_id) {
            Some(existing) => {
                *existing = payload.clone();
                Ok(())
            }
            None => Err(SubmissionError::PayloadNotFound(payload.callback_id.clone())),
        }
    }

    fn delete_payload(&self, callback_id: &CallbackId) -> SubmissionResult<bool> {
        Ok(self.payloads_mut()?.remove(callback_id).is_some())
    }

    fn find_study(&self, id: &StudyId) -> SubmissionResult<Option<Study>> {
        Ok(self.studies()?.get(id).cloned())
    }

    fn find_studies_by_callback(&self, callback_id: &CallbackId) -> SubmissionResult<Vec<Study>> {
        Ok(self
            .studies()?
            .values()
            .filter(|s| &s.callback_id == callback_id)
            .cloned()
            .collect())
    }

    fn insert_study_if_absent(&self, study: &Study) -> SubmissionResult<bool> {
        match self.studies_mut()?.entry(study.id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(study.clone());
                Ok(true)
            }
        }
    }

    fn replace_study(&self, study: &Study) -> SubmissionResult<bool> {
        match self.studies_mut()?.get_mut(&study.id) {
            Some(existing) => {
                *existing = study.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_study(&self, id: &StudyId) -> SubmissionResult<bool> {
        Ok(self.studies_mut()?.remove(id).is_some())
    }

    fn delete_studies_by_callback(
        &self,
        callback_id: &CallbackId,
    ) -> SubmissionResult<Vec<StudyId>> {
        let mut studies = self.studies_mut()?;
        let ids: Vec<StudyId> = studies
            .values()
            .filter(|s| &s.callback_id == callback_id)
            .map(|s| s.id.clone())
            .collect();
        for id in &ids {
            studies.remove(id);
        }
        Ok(ids)
    }

    /// Holds the study write lock for the whole batch, so concurrent batches never observe each
    /// other's partial inserts.
    fn insert_studies_if_absent(&self, studies: &[Study]) -> SubmissionResult<Vec<StudyId>> {
        let mut map = self.studies_mut()?;
        let conflicts: Vec<StudyId> = studies
            .iter()
            .filter(|s| map.contains_key(&s.id))
            .map(|s| s.id.clone())
            .collect();
        if conflicts.is_empty() {
            for study in studies {
                map.insert(study.id.clone(), study.clone());
            }
        }
        Ok(conflicts)
    }
}
