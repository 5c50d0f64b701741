//! Persistence collaborator.
//!
//! Everything the lifecycle manager knows about payloads and studies goes through
//! [`SubmissionStore`]. Two implementations are provided:
//!
//! - [`MemoryStore`]: lock-guarded maps, used by tests and ephemeral runs.
//! - [`FileStore`]: one JSON document per record under a data directory.
//!
//! The store offers per-record atomicity only. Callers needing all-or-nothing behaviour across
//! records use [`SubmissionStore::insert_studies_if_absent`], whose default implementation rolls
//! back on conflict.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::SubmissionResult;
use crate::study::{Payload, Study};
use ssv_callback_id::CallbackId;
use ssv_types::StudyId;

pub trait SubmissionStore: Send + Sync + std::fmt::Debug {
    /// Atomically claims `callback_id` by inserting a reserved payload record.
    ///
    /// Returns `false` when a payload with this id already exists; nothing is written then.
    fn reserve_callback(&self, callback_id: &CallbackId) -> SubmissionResult<bool>;

    fn find_payload(&self, callback_id: &CallbackId) -> SubmissionResult<Option<Payload>>;

    /// Returns every payload record, in no particular order.
    fn find_payloads(&self) -> SubmissionResult<Vec<Payload>>;

    /// Overwrites an existing payload record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SubmissionError::PayloadNotFound`] if the payload was never reserved.
    fn replace_payload(&self, payload: &Payload) -> SubmissionResult<()>;

    /// Removes the payload record. Returns `false` if it did not exist.
    fn delete_payload(&self, callback_id: &CallbackId) -> SubmissionResult<bool>;

    fn find_study(&self, id: &StudyId) -> SubmissionResult<Option<Study>>;

    /// Returns every study bound to `callback_id`, in no particular order.
    fn find_studies_by_callback(&self, callback_id: &CallbackId) -> SubmissionResult<Vec<Study>>;

    /// Inserts `study` unless a study with the same id exists. Returns whether it was inserted.
    fn insert_study_if_absent(&self, study: &Study) -> SubmissionResult<bool>;

    /// Overwrites an existing study. Returns `false` (and writes nothing) if it is absent, so a
    /// late job result can never resurrect a deleted study.
    fn replace_study(&self, study: &Study) -> SubmissionResult<bool>;

    fn delete_study(&self, id: &StudyId) -> SubmissionResult<bool>;

    /// Deletes every study bound to `callback_id` and returns their ids.
    fn delete_studies_by_callback(&self, callback_id: &CallbackId)
        -> SubmissionResult<Vec<StudyId>>;

    /// Inserts all `studies` or none of them.
    ///
    /// # Returns
    ///
    /// The ids that already existed. When this is non-empty no study from `studies` remains in
    /// the store.
    ///
    /// # Errors
    ///
    /// Any store error during insertion is returned after the studies inserted so far have been
    /// removed again (best effort).
    fn insert_studies_if_absent(&self, studies: &[Study]) -> SubmissionResult<Vec<StudyId>> {
        let mut inserted: Vec<&StudyId> = Vec::with_capacity(studies.len());
        let mut conflicts = Vec::new();

        for study in studies {
            match self.insert_study_if_absent(study) {
                Ok(true) => inserted.push(&study.id),
                Ok(false) => {
                    conflicts.push(study.id.clone());
                    break;
                }
                Err(e) => {
                    rollback(self, &inserted);
                    return Err(e);
                }
            }
        }

        if !conflicts.is_empty() {
            rollback(self, &inserted);
        }
        Ok(conflicts)
    }
}

fn rollback<S: SubmissionStore + ?Sized>(store: &S, inserted: &[&StudyId]) {
    for id in inserted {
        if let Err(e) = store.delete_study(id) {
            tracing::error!("failed to roll back study {}: {:?}", id, e);
        }
    }
}
