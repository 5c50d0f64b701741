//! Result aggregation.
//!
//! Turns whatever a dispatch produced into a complete, deterministic set of study results:
//! every submitted study ends up with `retrieved`/`data_valid` set, and every study without a
//! usable result is marked with the synthetic internal-processing code.

use crate::catalog::ErrorCatalog;
use crate::config::ArtifactCleanupPolicy;
use crate::dispatch::{DispatchOutcome, JobOutput};
use crate::error::SubmissionResult;
use crate::status::StudyStatusReport;
use crate::store::SubmissionStore;
use crate::study::Study;
use ssv_callback_id::CallbackId;
use ssv_files::WorkspaceService;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Aggregator {
    store: Arc<dyn SubmissionStore>,
    catalog: Arc<ErrorCatalog>,
    artifacts: WorkspaceService,
    cleanup_policy: ArtifactCleanupPolicy,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        catalog: Arc<ErrorCatalog>,
        artifacts: WorkspaceService,
        cleanup_policy: ArtifactCleanupPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            artifacts,
            cleanup_policy,
        }
    }

    /// Applies `outcome` to `submitted` and persists the result.
    ///
    /// # Arguments
    ///
    /// * `callback_id` - The batch being aggregated.
    /// * `submitted` - The studies that were dispatched, in submission order.
    /// * `outcome` - What the dispatcher returned.
    ///
    /// # Returns
    ///
    /// Exactly one report per submitted study, in submission order.
    ///
    /// # Errors
    ///
    /// Returns a store error if a study read or write fails. Each study is re-read before its
    /// result is written, so fields changed while the batch was running (publication details)
    /// survive. Writes are plain overwrites keyed by study id, so the whole call can be retried.
    pub fn aggregate(
        &self,
        callback_id: &CallbackId,
        submitted: &[Study],
        outcome: DispatchOutcome,
    ) -> SubmissionResult<Vec<StudyStatusReport>> {
        let mut outputs: HashMap<String, JobOutput> = HashMap::new();
        match outcome {
            DispatchOutcome::Completed(records) => {
                for record in records {
                    if !submitted.iter().any(|s| s.id.as_str() == record.id) {
                        tracing::warn!(
                            "batch {} output names study '{}' which was not submitted; ignoring",
                            callback_id,
                            record.id
                        );
                        continue;
                    }
                    outputs.insert(record.id.clone(), record);
                }
            }
            DispatchOutcome::Failed(reason) => {
                tracing::warn!(
                    "batch {} failed as a whole ({}); marking all studies as internal errors",
                    callback_id,
                    reason
                );
            }
        }

        let mut results = Vec::with_capacity(submitted.len());
        for dispatched in submitted {
            let current = self
                .store
                .find_study(&dispatched.id)?
                .filter(|s| &s.callback_id == callback_id);
            let stored = current.is_some();
            let mut study = current.unwrap_or_else(|| dispatched.clone());
            match outputs.get(study.id.as_str()) {
                Some(out) => study.record_result(out.retrieved, out.data_valid, out.error_code),
                None => {
                    tracing::warn!(
                        "no result for study {} in batch {}; recording internal error",
                        study.id,
                        callback_id
                    );
                    study.record_internal_failure();
                }
            }

            if !stored || !self.store.replace_study(&study)? {
                tracing::warn!(
                    "study {} of batch {} no longer exists; result dropped",
                    study.id,
                    callback_id
                );
            }
            results.push(study);
        }

        let failed: Vec<&Study> = results.iter().filter(|s| s.error_code.is_some()).collect();
        if !failed.is_empty() {
            self.purge_artifacts(callback_id, &failed);
        }

        tracing::info!(
            "batch {} aggregated: {} valid, {} invalid",
            callback_id,
            results.len() - failed.len(),
            failed.len()
        );

        Ok(results
            .iter()
            .map(|s| StudyStatusReport::from_study(s, &self.catalog))
            .collect())
    }

    /// Removes validated artifacts after a batch with failures. Best effort: errors are logged.
    fn purge_artifacts(&self, callback_id: &CallbackId, failed: &[&Study]) {
        match self.cleanup_policy {
            ArtifactCleanupPolicy::WholeBatch => {
                if let Err(e) = self.artifacts.remove(callback_id) {
                    tracing::error!(
                        "failed to purge validated artifacts of batch {}: {:?}",
                        callback_id,
                        e
                    );
                }
            }
            ArtifactCleanupPolicy::FailedOnly => {
                for study in failed {
                    if let Err(e) = self.artifacts.remove_matching(callback_id, study.id.as_str())
                    {
                        tracing::error!(
                            "failed to purge validated artifacts of study {}: {:?}",
                            study.id,
                            e
                        );
                    }
                }
            }
        }
    }
}
