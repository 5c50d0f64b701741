//! Batch validation of submission requests.
//!
//! A payload is accepted only if every entry passes every rule. Rules are evaluated exhaustively
//! so the caller receives the complete list of violations in one response.

use crate::error::SubmissionResult;
use crate::store::SubmissionStore;
use crate::study::StudyDraft;
use api_shared::{StudyEntry, SubmitReq};
use ssv_types::{NonEmptyText, StudyId};
use std::collections::HashSet;

pub const EMPTY_PAYLOAD_MESSAGE: &str = "payload must contain a non-empty list of requestEntries";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted(Vec<StudyDraft>),
    Rejected(Vec<String>),
}

/// Validates `request` against the structural rules and the current store contents.
///
/// # Errors
///
/// Only store failures are returned as errors. Rule violations are reported through
/// [`ValidationOutcome::Rejected`].
pub fn validate(
    request: &SubmitReq,
    store: &dyn SubmissionStore,
) -> SubmissionResult<ValidationOutcome> {
    if request.request_entries.is_empty() {
        return Ok(ValidationOutcome::Rejected(vec![
            EMPTY_PAYLOAD_MESSAGE.to_owned()
        ]));
    }

    let mut errors = Vec::new();
    let mut drafts = Vec::with_capacity(request.request_entries.len());
    let mut seen: HashSet<&str> = HashSet::new();
    let mut reported_duplicates: HashSet<&str> = HashSet::new();

    for (index, entry) in request.request_entries.iter().enumerate() {
        let id = present(&entry.id);
        let file_path = present(&entry.file_path);
        let checksum = present(&entry.checksum);
        let assembly = present(&entry.assembly);

        for (name, value) in [
            ("id", id),
            ("filePath", file_path),
            ("checksum", checksum),
            ("assembly", assembly),
        ] {
            if value.is_none() {
                errors.push(format!("entry {}: missing field '{}'", index, name));
            }
        }

        let study_id = match id {
            Some(raw) => match StudyId::parse(raw) {
                Ok(study_id) => Some(study_id),
                Err(e) => {
                    errors.push(e.to_string());
                    None
                }
            },
            None => None,
        };

        if let Some(raw) = id {
            if !seen.insert(raw) {
                if reported_duplicates.insert(raw) {
                    errors.push(format!("study id '{}' duplicated in payload", raw));
                }
                continue;
            }
        }

        if let Some(study_id) = &study_id {
            if store.find_study(study_id)?.is_some() {
                errors.push(format!("study id '{}' exists already", study_id));
            }
        }

        if let (Some(id), Some(file_path), Some(checksum), Some(assembly)) =
            (study_id, file_path, checksum, assembly)
        {
            drafts.push(draft(entry, id, file_path, checksum, assembly)?);
        }
    }

    if errors.is_empty() {
        Ok(ValidationOutcome::Accepted(drafts))
    } else {
        Ok(ValidationOutcome::Rejected(errors))
    }
}

/// A field counts as missing when absent or blank.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn draft(
    entry: &StudyEntry,
    id: StudyId,
    file_path: &str,
    checksum: &str,
    assembly: &str,
) -> SubmissionResult<StudyDraft> {
    Ok(StudyDraft {
        id,
        file_path: NonEmptyText::new(file_path)?,
        checksum: NonEmptyText::new(checksum)?,
        assembly: NonEmptyText::new(assembly)?,
        readme: present(&entry.readme).map(str::to_owned),
        entry_ref: present(&entry.entry_ref).map(str::to_owned),
    })
}
