//! Persisted records: studies and payloads.

use crate::catalog::codes;
use crate::status::StudyStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ssv_callback_id::CallbackId;
use ssv_types::{NonEmptyText, StudyId};

/// A study accepted by the batch validator but not yet bound to a callback id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyDraft {
    pub id: StudyId,
    pub file_path: NonEmptyText,
    pub checksum: NonEmptyText,
    pub assembly: NonEmptyText,
    pub readme: Option<String>,
    pub entry_ref: Option<String>,
}

/// One data-submission entry.
///
/// # Invariants
/// - Once terminal, `error_code` is set iff [`Study::status`] is not `VALID`.
/// - `data_valid` is never `Some(true)` while `error_code` is set.
///
/// Both are maintained by [`Study::record_result`], the only writer of validation flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    pub id: StudyId,
    pub callback_id: CallbackId,
    pub file_path: NonEmptyText,
    pub checksum: NonEmptyText,
    pub assembly: NonEmptyText,
    #[serde(default)]
    pub readme: Option<String>,
    #[serde(default)]
    pub entry_ref: Option<String>,
    #[serde(default)]
    pub retrieved: Option<bool>,
    #[serde(default)]
    pub data_valid: Option<bool>,
    #[serde(default)]
    pub error_code: Option<u16>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub pmid: Option<String>,
    #[serde(default)]
    pub publication_ref: Option<String>,
}

impl Study {
    /// Binds a validated draft to the payload it was accepted in.
    pub fn from_draft(draft: StudyDraft, callback_id: CallbackId) -> Self {
        Self {
            id: draft.id,
            callback_id,
            file_path: draft.file_path,
            checksum: draft.checksum,
            assembly: draft.assembly,
            readme: draft.readme,
            entry_ref: draft.entry_ref,
            retrieved: None,
            data_valid: None,
            error_code: None,
            author_name: None,
            pmid: None,
            publication_ref: None,
        }
    }

    pub fn status(&self) -> StudyStatus {
        StudyStatus::derive(self.retrieved, self.data_valid)
    }

    /// Overwrites the validation flags with a job result.
    ///
    /// The write is a full replacement, so recording the same result twice leaves the study
    /// unchanged. Results that would break the record invariants are normalised:
    /// - a reported error code forces `data_valid` to false;
    /// - an invalid outcome with no code gets [`codes::FILE_NOT_FOUND`] when the file was not
    ///   retrieved, otherwise [`codes::VALIDATION_FAILED`].
    pub fn record_result(&mut self, retrieved: bool, data_valid: bool, error_code: Option<u16>) {
        let data_valid = retrieved && data_valid && error_code.is_none();
        let error_code = match error_code {
            Some(code) => Some(code),
            None if !retrieved => Some(codes::FILE_NOT_FOUND),
            None if !data_valid => Some(codes::VALIDATION_FAILED),
            None => None,
        };

        self.retrieved = Some(retrieved);
        self.data_valid = Some(data_valid);
        self.error_code = error_code;
    }

    /// Records the synthetic internal-processing failure used when no real result exists.
    pub fn record_internal_failure(&mut self) {
        self.record_result(false, false, Some(codes::INTERNAL_PROCESSING_ERROR));
    }
}

/// A caller-submitted batch.
///
/// # Invariants
/// - Accepted: `study_ids` non-empty, `metadata_errors` empty, every study persisted.
/// - Rejected: `study_ids` empty, `metadata_errors` non-empty, no study persisted.
/// - Reserved (transient, between id allocation and acceptance/rejection): both empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub callback_id: CallbackId,
    #[serde(default)]
    pub study_ids: Vec<StudyId>,
    #[serde(default)]
    pub metadata_errors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Payload {
    /// A placeholder record that claims `callback_id` before anything references it.
    pub fn reserved(callback_id: CallbackId) -> Self {
        Self {
            callback_id,
            study_ids: Vec::new(),
            metadata_errors: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_rejected(&self) -> bool {
        !self.metadata_errors.is_empty()
    }
}
