//! Study and payload status derivation.
//!
//! Status is never stored. It is a pure function of a study's `(retrieved, data_valid)` flags,
//! so it cannot drift from the record it describes:
//!
//! | retrieved | data_valid | status       |
//! |-----------|------------|--------------|
//! | unset     | unset      | `RETRIEVING` |
//! | true      | unset      | `VALIDATING` |
//! | false     | any        | `INVALID`    |
//! | true      | false      | `INVALID`    |
//! | true      | true       | `VALID`      |

use crate::catalog::ErrorCatalog;
use crate::study::Study;
use api_shared::{StatusRes, StudyStatusEntry};
use serde::{Deserialize, Serialize};
use ssv_callback_id::CallbackId;
use ssv_types::StudyId;
use std::fmt;

/// Lifecycle state of a single study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudyStatus {
    Retrieving,
    Validating,
    Valid,
    Invalid,
}

impl StudyStatus {
    /// Derives the status from the tri-state flags.
    ///
    /// `(unset, Some(_))` is not produced by the aggregator; it derives as `INVALID` when
    /// `data_valid` is false (a false flag always wins) and `RETRIEVING` otherwise.
    pub fn derive(retrieved: Option<bool>, data_valid: Option<bool>) -> Self {
        match (retrieved, data_valid) {
            (Some(false), _) | (_, Some(false)) => StudyStatus::Invalid,
            (Some(true), Some(true)) => StudyStatus::Valid,
            (Some(true), None) => StudyStatus::Validating,
            (None, _) => StudyStatus::Retrieving,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StudyStatus::Valid | StudyStatus::Invalid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StudyStatus::Retrieving => "RETRIEVING",
            StudyStatus::Validating => "VALIDATING",
            StudyStatus::Valid => "VALID",
            StudyStatus::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for StudyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate state of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadStatus {
    Processing,
    Valid,
    Invalid,
}

impl PayloadStatus {
    /// `PROCESSING` while any study is non-terminal, `VALID` when every study is valid,
    /// `INVALID` otherwise. A payload with no studies (a rejected one) is `INVALID`.
    pub fn from_studies(statuses: impl IntoIterator<Item = StudyStatus>) -> Self {
        let mut any = false;
        let mut all_valid = true;
        for status in statuses {
            any = true;
            if !status.is_terminal() {
                return PayloadStatus::Processing;
            }
            all_valid &= status == StudyStatus::Valid;
        }
        if any && all_valid {
            PayloadStatus::Valid
        } else {
            PayloadStatus::Invalid
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadStatus::Processing => "PROCESSING",
            PayloadStatus::Valid => "VALID",
            PayloadStatus::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for PayloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-time view of a study: derived status plus resolved error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyStatusReport {
    pub id: StudyId,
    pub status: StudyStatus,
    pub error_code: Option<u16>,
    pub error: Option<String>,
    pub publication_ref: Option<String>,
}

impl StudyStatusReport {
    pub fn from_study(study: &Study, catalog: &ErrorCatalog) -> Self {
        Self {
            id: study.id.clone(),
            status: study.status(),
            error_code: study.error_code,
            error: study
                .error_code
                .and_then(|code| catalog.text(code))
                .map(str::to_owned),
            publication_ref: study.publication_ref.clone(),
        }
    }
}

/// Read-time view of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadStatusReport {
    pub callback_id: CallbackId,
    pub status: PayloadStatus,
    pub studies: Vec<StudyStatusReport>,
    pub metadata_errors: Vec<String>,
}

impl From<StudyStatusReport> for StudyStatusEntry {
    fn from(report: StudyStatusReport) -> Self {
        StudyStatusEntry {
            id: report.id.to_string(),
            status: report.status.to_string(),
            error: report.error,
            publication_ref: report.publication_ref,
        }
    }
}

impl From<PayloadStatusReport> for StatusRes {
    fn from(report: PayloadStatusReport) -> Self {
        StatusRes {
            callback_id: report.callback_id.to_string(),
            status: report.status.to_string(),
            status_list: report.studies.into_iter().map(Into::into).collect(),
            metadata_errors: report.metadata_errors,
        }
    }
}
