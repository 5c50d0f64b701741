//! Wire types for the submission API.
//!
//! Field names follow the public JSON contract (`requestEntries`, `callbackID`, `statusList`).
//! Request entry fields are all optional at the type level: a *shape* error (for example a
//! number where a string is expected) fails decoding at the boundary, while *presence* of
//! mandatory fields is checked by the batch validator so every missing field is reported in one
//! round trip.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Submission request: a batch of study entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReq {
    #[serde(default)]
    pub request_entries: Vec<StudyEntry>,
}

/// One study entry as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudyEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub assembly: Option<String>,
    #[serde(default)]
    pub readme: Option<String>,
    #[serde(default)]
    pub entry_ref: Option<String>,
}

/// Returned when a submission is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubmitRes {
    #[serde(rename = "callbackID")]
    pub callback_id: String,
}

/// Returned when a submission is rejected. Carries every violation found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RejectedRes {
    #[serde(rename = "callbackID")]
    pub callback_id: String,
    pub errors: Vec<String>,
}

/// Poll response for a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusRes {
    #[serde(rename = "callbackID")]
    pub callback_id: String,
    /// `PROCESSING`, `VALID` or `INVALID`
    pub status: String,
    pub status_list: Vec<StudyStatusEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_errors: Vec<String>,
}

/// Per-study entry within a poll response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudyStatusEntry {
    pub id: String,
    /// `RETRIEVING`, `VALIDATING`, `VALID` or `INVALID`
    pub status: String,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_ref: Option<String>,
}

/// Publication-detail update for studies of an existing payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePublicationReq {
    #[serde(default)]
    pub request_entries: Vec<PublicationEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicationEntry {
    pub id: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub pmid: Option<String>,
    #[serde(default)]
    pub publication_ref: Option<String>,
}

/// Deletion confirmation with a per-study acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRes {
    #[serde(rename = "callbackID")]
    pub callback_id: String,
    pub status_list: Vec<DeletedStudyEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeletedStudyEntry {
    pub id: String,
    /// Always `DELETED`
    pub status: String,
}

/// Generic error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub message: String,
}
