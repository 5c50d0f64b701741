//! # SSV Core
//!
//! Submission lifecycle manager for summary-statistics payloads.
//!
//! This crate contains the whole lifecycle of a payload:
//! - Callback id allocation with atomic reservation in the store
//! - Batch validation of submitted entries
//! - Status derivation for studies and payloads
//! - Dispatch of the external validator (local subprocess or remote queue over SSH)
//! - Aggregation of job output into a complete, persisted result
//! - A background queue that drives dispatch and aggregation
//!
//! **No API concerns**: HTTP servers and CLI parsing belong in `api-rest` and `ssv-cli`.

pub mod aggregate;
pub mod callback;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod dispatch;
mod error;
pub mod queue;
pub mod service;
pub mod status;
pub mod store;
pub mod study;
pub mod validation;

pub use catalog::ErrorCatalog;
pub use config::{
    resolve_config, ArtifactCleanupPolicy, CoreConfig, PipelineConfig, RemoteConfig, StoreKind,
    ValidationMode,
};
pub use error::{SubmissionError, SubmissionResult};
pub use service::{DeletionReport, Submission, SubmissionService};
pub use status::{PayloadStatus, PayloadStatusReport, StudyStatus, StudyStatusReport};
pub use store::{FileStore, MemoryStore, SubmissionStore};
pub use study::{Payload, Study};

pub use ssv_callback_id::CallbackId;
pub use ssv_types::StudyId;

use std::sync::Arc;

/// Opens the store selected by `cfg`.
///
/// # Errors
///
/// Returns an error if the file store's data directory cannot be created.
pub fn open_store(cfg: &CoreConfig) -> SubmissionResult<Arc<dyn SubmissionStore>> {
    Ok(match cfg.store_kind() {
        StoreKind::File => Arc::new(FileStore::open(cfg.data_dir())?),
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    })
}
