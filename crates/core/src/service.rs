//! Submission service.
//!
//! [`SubmissionService`] is the one entry point the REST API and the CLI use. It owns the store,
//! the catalog and the dispatch/aggregation pipeline, and implements [`TaskHandler`] so the
//! background queue can drive validation through it.

use crate::aggregate::Aggregator;
use crate::callback::CallbackIdGenerator;
use crate::catalog::ErrorCatalog;
use crate::config::CoreConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher, JobBackend};
use crate::error::{SubmissionError, SubmissionResult};
use crate::queue::{QueueHandle, TaskHandler, ValidationTask};
use crate::status::{PayloadStatus, PayloadStatusReport, StudyStatusReport};
use crate::store::SubmissionStore;
use crate::study::{Payload, Study};
use crate::validation::{validate, ValidationOutcome};
use api_shared::{UpdatePublicationReq, SubmitReq};
use async_trait::async_trait;
use ssv_callback_id::CallbackId;
use ssv_files::WorkspaceService;
use ssv_types::StudyId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of a submission that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Accepted(CallbackId),
    /// The payload was recorded together with every violation; no study was written.
    Rejected {
        callback_id: CallbackId,
        errors: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub callback_id: CallbackId,
    /// Ids of the deleted studies in submission order.
    pub deleted: Vec<StudyId>,
}

#[derive(Debug)]
pub struct SubmissionService {
    store: Arc<dyn SubmissionStore>,
    catalog: Arc<ErrorCatalog>,
    generator: CallbackIdGenerator,
    dispatcher: Dispatcher,
    aggregator: Aggregator,
    artifacts: WorkspaceService,
    queue: QueueHandle,
}

impl SubmissionService {
    /// Wires the service together.
    ///
    /// # Errors
    ///
    /// Returns an error if the work or validated-artifact directories cannot be created.
    pub fn new(
        cfg: Arc<CoreConfig>,
        store: Arc<dyn SubmissionStore>,
        catalog: Arc<ErrorCatalog>,
        backend: Arc<dyn JobBackend>,
        queue: QueueHandle,
    ) -> SubmissionResult<Self> {
        std::fs::create_dir_all(cfg.validated_dir())
            .map_err(SubmissionError::StorageDirCreation)?;
        let artifacts = WorkspaceService::new(cfg.validated_dir())?;
        let dispatcher = Dispatcher::new(&cfg, backend)?;
        let aggregator = Aggregator::new(
            store.clone(),
            catalog.clone(),
            artifacts.clone(),
            cfg.cleanup_policy(),
        );

        Ok(Self {
            store,
            catalog,
            generator: CallbackIdGenerator,
            dispatcher,
            aggregator,
            artifacts,
            queue,
        })
    }

    pub fn catalog(&self) -> &ErrorCatalog {
        &self.catalog
    }

    /// Validates and records a payload, then queues validation if it was accepted.
    ///
    /// A callback id is allocated either way, so rejected payloads can be polled for their
    /// errors later.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures, callback id exhaustion, or a closed queue. Nothing
    /// from the failed submission remains in the store in that case.
    pub fn submit(&self, request: &SubmitReq) -> SubmissionResult<Submission> {
        let outcome = validate(request, self.store.as_ref())?;
        let callback_id = self.generator.generate(self.store.as_ref())?;

        let drafts = match outcome {
            ValidationOutcome::Rejected(errors) => {
                return self.record_rejection(callback_id, errors);
            }
            ValidationOutcome::Accepted(drafts) => drafts,
        };

        let studies: Vec<Study> = drafts
            .into_iter()
            .map(|d| Study::from_draft(d, callback_id.clone()))
            .collect();

        let conflicts = match self.store.insert_studies_if_absent(&studies) {
            Ok(conflicts) => conflicts,
            Err(e) => {
                self.discard_payload(&callback_id);
                return Err(e);
            }
        };
        if !conflicts.is_empty() {
            // Another submission claimed these ids after validation ran.
            let errors = conflicts
                .iter()
                .map(|id| format!("study id '{}' exists already", id))
                .collect();
            return self.record_rejection(callback_id, errors);
        }

        let accepted = self.accept(&callback_id, &studies);
        if let Err(e) = accepted {
            if let Err(cleanup) = self.store.delete_studies_by_callback(&callback_id) {
                tracing::error!(
                    "failed to roll back studies of {}: {:?}",
                    callback_id,
                    cleanup
                );
            }
            self.discard_payload(&callback_id);
            return Err(e);
        }

        tracing::info!(
            "payload {} accepted with {} stud(ies)",
            callback_id,
            studies.len()
        );
        Ok(Submission::Accepted(callback_id))
    }

    fn accept(&self, callback_id: &CallbackId, studies: &[Study]) -> SubmissionResult<()> {
        let mut payload = self
            .store
            .find_payload(callback_id)?
            .ok_or_else(|| SubmissionError::PayloadNotFound(callback_id.clone()))?;
        payload.study_ids = studies.iter().map(|s| s.id.clone()).collect();
        self.store.replace_payload(&payload)?;
        self.queue.enqueue(callback_id.clone())
    }

    fn record_rejection(
        &self,
        callback_id: CallbackId,
        errors: Vec<String>,
    ) -> SubmissionResult<Submission> {
        let payload = Payload {
            metadata_errors: errors.clone(),
            ..Payload::reserved(callback_id.clone())
        };
        if let Err(e) = self.store.replace_payload(&payload) {
            self.discard_payload(&callback_id);
            return Err(e);
        }
        tracing::info!(
            "payload {} rejected with {} error(s)",
            callback_id,
            errors.len()
        );
        Ok(Submission::Rejected {
            callback_id,
            errors,
        })
    }

    fn discard_payload(&self, callback_id: &CallbackId) {
        if let Err(e) = self.store.delete_payload(callback_id) {
            tracing::error!("failed to discard payload {}: {:?}", callback_id, e);
        }
    }

    fn load(&self, callback_id: &CallbackId) -> SubmissionResult<(Payload, Vec<Study>)> {
        let payload = self
            .store
            .find_payload(callback_id)?
            .ok_or_else(|| SubmissionError::PayloadNotFound(callback_id.clone()))?;

        let mut by_id: HashMap<StudyId, Study> = self
            .store
            .find_studies_by_callback(callback_id)?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        let studies = payload
            .study_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();
        Ok((payload, studies))
    }

    /// Builds the current status report for a payload.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::PayloadNotFound`] for an unknown callback id.
    pub fn status(&self, callback_id: &CallbackId) -> SubmissionResult<PayloadStatusReport> {
        let (payload, studies) = self.load(callback_id)?;
        let reports: Vec<StudyStatusReport> = studies
            .iter()
            .map(|s| StudyStatusReport::from_study(s, &self.catalog))
            .collect();

        let status = if payload.is_rejected() {
            PayloadStatus::Invalid
        } else if payload.study_ids.is_empty() {
            // Reserved but not yet accepted.
            PayloadStatus::Processing
        } else {
            PayloadStatus::from_studies(reports.iter().map(|r| r.status))
        };

        Ok(PayloadStatusReport {
            callback_id: payload.callback_id,
            status,
            studies: reports,
            metadata_errors: payload.metadata_errors,
        })
    }

    /// Sets publication details on studies of a payload.
    ///
    /// Only fields present (and non-blank) in an entry are changed.
    ///
    /// # Errors
    ///
    /// - [`SubmissionError::PayloadNotFound`] for an unknown callback id.
    /// - [`SubmissionError::InvalidInput`] for an empty update.
    /// - [`SubmissionError::StudiesNotInPayload`] if any entry names a study outside the
    ///   payload; nothing is written then.
    pub fn update_publication(
        &self,
        callback_id: &CallbackId,
        update: &UpdatePublicationReq,
    ) -> SubmissionResult<PayloadStatusReport> {
        if update.request_entries.is_empty() {
            return Err(SubmissionError::InvalidInput(
                "update must contain a non-empty list of requestEntries".into(),
            ));
        }

        let (_, studies) = self.load(callback_id)?;
        let mut by_id: HashMap<&str, Study> =
            studies.iter().map(|s| (s.id.as_str(), s.clone())).collect();

        let unknown: Vec<String> = update
            .request_entries
            .iter()
            .filter(|e| !by_id.contains_key(e.id.as_str()))
            .map(|e| e.id.clone())
            .collect();
        if !unknown.is_empty() {
            return Err(SubmissionError::StudiesNotInPayload {
                callback_id: callback_id.clone(),
                ids: unknown,
            });
        }

        let nonblank = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };
        for entry in &update.request_entries {
            if let Some(study) = by_id.get_mut(entry.id.as_str()) {
                if let Some(author_name) = nonblank(&entry.author_name) {
                    study.author_name = Some(author_name);
                }
                if let Some(pmid) = nonblank(&entry.pmid) {
                    study.pmid = Some(pmid);
                }
                if let Some(publication_ref) = nonblank(&entry.publication_ref) {
                    study.publication_ref = Some(publication_ref);
                }
            }
        }

        for entry in &update.request_entries {
            if let Some(study) = by_id.remove(entry.id.as_str()) {
                self.store.replace_study(&study)?;
            }
        }
        tracing::info!(
            "updated publication details of {} stud(ies) in {}",
            update.request_entries.len(),
            callback_id
        );

        self.status(callback_id)
    }

    /// Deletes a payload and its studies, then removes its directories in the background.
    ///
    /// A remote job that is still running is not cancelled; its late results are dropped by
    /// the store because the studies no longer exist.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::PayloadNotFound`] for an unknown callback id, or a store error.
    pub fn delete(&self, callback_id: &CallbackId) -> SubmissionResult<DeletionReport> {
        let payload = self
            .store
            .find_payload(callback_id)?
            .ok_or_else(|| SubmissionError::PayloadNotFound(callback_id.clone()))?;

        let removed = self.store.delete_studies_by_callback(callback_id)?;
        self.store.delete_payload(callback_id)?;

        let deleted: Vec<StudyId> = payload
            .study_ids
            .into_iter()
            .filter(|id| removed.contains(id))
            .collect();
        tracing::info!(
            "payload {} deleted with {} stud(ies)",
            callback_id,
            deleted.len()
        );

        self.remove_directories(callback_id);
        Ok(DeletionReport {
            callback_id: callback_id.clone(),
            deleted,
        })
    }

    fn remove_directories(&self, callback_id: &CallbackId) {
        let work = self.dispatcher.workspace().clone();
        let artifacts = self.artifacts.clone();
        let callback_id = callback_id.clone();

        let remove = move || {
            for (area, workspace) in [("work", &work), ("validated", &artifacts)] {
                if let Err(e) = workspace.remove(&callback_id) {
                    tracing::warn!(
                        "failed to remove {} directory of {}: {:?}",
                        area,
                        callback_id,
                        e
                    );
                }
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }

    /// The background job body: dispatch the payload's studies and aggregate the outcome.
    ///
    /// A payload deleted before its task runs is skipped.
    ///
    /// # Errors
    ///
    /// Returns store errors, which make the queue redeliver the task.
    pub async fn run_validation(
        &self,
        callback_id: &CallbackId,
        cancel: &CancellationToken,
    ) -> SubmissionResult<Vec<StudyStatusReport>> {
        let studies = match self.load(callback_id) {
            Ok((_, studies)) => studies,
            Err(SubmissionError::PayloadNotFound(_)) => {
                tracing::info!("payload {} was deleted before validation", callback_id);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        if studies.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(
            "validating payload {} ({} stud(ies))",
            callback_id,
            studies.len()
        );
        let outcome = self.dispatcher.dispatch(callback_id, &studies, cancel).await;
        self.aggregator.aggregate(callback_id, &studies, outcome)
    }

    /// Completes every still-unvalidated study of a batch with the internal processing error.
    fn fail_pending(&self, callback_id: &CallbackId, reason: &str) -> SubmissionResult<()> {
        let studies: Vec<Study> = match self.load(callback_id) {
            Ok((_, studies)) => studies
                .into_iter()
                .filter(|s| !s.status().is_terminal())
                .collect(),
            Err(SubmissionError::PayloadNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if studies.is_empty() {
            return Ok(());
        }
        self.aggregator
            .aggregate(callback_id, &studies, DispatchOutcome::Failed(reason.into()))
            .map(|_| ())
    }

    /// Re-enqueues accepted payloads that still have unvalidated studies, oldest first.
    ///
    /// Run once at startup, after the workers exist, so batches queued by an earlier process that
    /// stopped without a clean shutdown are picked up again.
    ///
    /// # Errors
    ///
    /// Returns store errors or [`SubmissionError::QueueClosed`].
    pub fn recover_pending(&self) -> SubmissionResult<Vec<CallbackId>> {
        let mut payloads = self.store.find_payloads()?;
        payloads.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut recovered = Vec::new();
        for payload in payloads {
            if payload.is_rejected() || payload.study_ids.is_empty() {
                continue;
            }
            let (_, studies) = self.load(&payload.callback_id)?;
            if studies.iter().all(|s| s.status().is_terminal()) {
                continue;
            }
            self.queue.enqueue(payload.callback_id.clone())?;
            recovered.push(payload.callback_id);
        }
        if !recovered.is_empty() {
            tracing::info!("re-enqueued {} unfinished payload(s)", recovered.len());
        }
        Ok(recovered)
    }
}

#[async_trait]
impl TaskHandler for SubmissionService {
    async fn handle(
        &self,
        task: &ValidationTask,
        cancel: &CancellationToken,
    ) -> SubmissionResult<()> {
        self.run_validation(&task.callback_id, cancel)
            .await
            .map(|_| ())
    }

    async fn abandon(&self, task: &ValidationTask) {
        let reason = format!("validation abandoned after {} attempt(s)", task.attempt);
        if let Err(e) = self.fail_pending(&task.callback_id, &reason) {
            tracing::error!(
                "failed to complete abandoned payload {}: {:?}",
                task.callback_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::codes;
    use crate::config::ValidationMode;
    use crate::dispatch::{BatchJob, JobHandle, JobStatus, Manifest};
    use crate::queue::{self, PendingQueue};
    use crate::status::StudyStatus;
    use crate::store::{FileStore, MemoryStore};
    use api_shared::{PublicationEntry, StudyEntry};
    use sha2::{Digest, Sha256};
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Stands in for the external pipeline: checks existence and SHA-256 checksum only.
    #[derive(Debug, Default)]
    struct EmulatedValidator {
        omit: HashSet<String>,
    }

    #[async_trait]
    impl JobBackend for EmulatedValidator {
        fn name(&self) -> &'static str {
            "emulated"
        }

        async fn submit(&self, batch: &BatchJob) -> SubmissionResult<JobHandle> {
            let manifest: Manifest =
                serde_json::from_slice(&std::fs::read(&batch.manifest_path).unwrap()).unwrap();
            for entry in manifest.studies {
                if self.omit.contains(&entry.id) {
                    continue;
                }
                let (retrieved, data_valid, code) = match std::fs::read(&entry.file_path) {
                    Err(_) => (0, 0, Some(codes::FILE_NOT_FOUND)),
                    Ok(bytes) if hex::encode(Sha256::digest(&bytes)) != entry.checksum => {
                        (1, 0, Some(codes::CHECKSUM_MISMATCH))
                    }
                    Ok(_) => (1, 1, None),
                };
                let record = serde_json::json!({
                    "id": entry.id,
                    "retrieved": retrieved,
                    "dataValid": data_valid,
                    "errorCode": code,
                });
                std::fs::write(
                    batch.results_dir.join(format!("{}.json", entry.id)),
                    record.to_string(),
                )
                .unwrap();
            }
            Ok(JobHandle("emulated".into()))
        }

        async fn poll_status(&self, _handle: &JobHandle) -> SubmissionResult<JobStatus> {
            Ok(JobStatus::Done)
        }

        async fn fetch_results(&self, _h: &JobHandle, _b: &BatchJob) -> SubmissionResult<()> {
            Ok(())
        }

        async fn cleanup(&self, _batch: &BatchJob) -> SubmissionResult<()> {
            Ok(())
        }
    }

    struct Harness {
        dir: TempDir,
        store: Arc<MemoryStore>,
        service: Arc<SubmissionService>,
        pending: Option<PendingQueue>,
    }

    fn harness(validator: EmulatedValidator) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let (service, pending) = service_on(dir.path(), store.clone(), validator);
        Harness {
            dir,
            store,
            service: Arc::new(service),
            pending: Some(pending),
        }
    }

    fn service_on(
        dir: &Path,
        store: Arc<dyn SubmissionStore>,
        validator: EmulatedValidator,
    ) -> (SubmissionService, PendingQueue) {
        let cfg = CoreConfig::new(
            dir.join("data"),
            dir.join("work"),
            dir.join("validated"),
            ValidationMode::Local {
                command: "unused".into(),
            },
        )
        .unwrap()
        .with_poll_interval(Duration::from_millis(1))
        .unwrap();
        let (handle, pending) = queue::channel();
        let service = SubmissionService::new(
            Arc::new(cfg),
            store,
            Arc::new(ErrorCatalog::seeded()),
            Arc::new(validator),
            handle,
        )
        .unwrap();
        (service, pending)
    }

    impl Harness {
        /// Writes a study file and returns its path and SHA-256.
        fn data_file(&self, name: &str, contents: &[u8]) -> (PathBuf, String) {
            let path = self.dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            (path, hex::encode(Sha256::digest(contents)))
        }
    }

    fn entry(id: &str, path: &Path, checksum: &str) -> StudyEntry {
        StudyEntry {
            id: Some(id.into()),
            file_path: Some(path.to_string_lossy().into_owned()),
            checksum: Some(checksum.into()),
            assembly: Some("GRCh38".into()),
            readme: None,
            entry_ref: None,
        }
    }

    fn request(entries: Vec<StudyEntry>) -> SubmitReq {
        SubmitReq {
            request_entries: entries,
        }
    }

    fn accepted(submission: Submission) -> CallbackId {
        match submission {
            Submission::Accepted(id) => id,
            other => panic!("expected acceptance, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_valid_studies() {
        let h = harness(EmulatedValidator::default());
        let (a, sum_a) = h.data_file("a.tsv", b"chr\tpos\n1\t100\n");
        let (b, sum_b) = h.data_file("b.tsv", b"chr\tpos\n2\t200\n");

        let cb = accepted(
            h.service
                .submit(&request(vec![entry("abcd1", &a, &sum_a), entry("abcd2", &b, &sum_b)]))
                .unwrap(),
        );
        assert_eq!(h.service.status(&cb).unwrap().status, PayloadStatus::Processing);

        h.service
            .run_validation(&cb, &CancellationToken::new())
            .await
            .unwrap();

        let report = h.service.status(&cb).unwrap();
        assert_eq!(report.status, PayloadStatus::Valid);
        assert_eq!(report.studies.len(), 2);
        for study in &report.studies {
            assert_eq!(study.status, StudyStatus::Valid);
            assert_eq!(study.error, None);
        }
    }

    #[tokio::test]
    async fn test_end_to_end_failures_carry_codes() {
        let h = harness(EmulatedValidator::default());
        let (good, sum) = h.data_file("good.tsv", b"ok");
        let missing = h.dir.path().join("missing.tsv");

        let cb = accepted(
            h.service
                .submit(&request(vec![
                    entry("miss1", &missing, &sum),
                    entry("bad01", &good, "0000"),
                ]))
                .unwrap(),
        );
        h.service
            .run_validation(&cb, &CancellationToken::new())
            .await
            .unwrap();

        let report = h.service.status(&cb).unwrap();
        assert_eq!(report.status, PayloadStatus::Invalid);
        assert_eq!(report.studies[0].error_code, Some(codes::FILE_NOT_FOUND));
        assert_eq!(report.studies[1].error_code, Some(codes::CHECKSUM_MISMATCH));
        assert_eq!(
            report.studies[0].error.as_deref(),
            h.service.catalog().text(codes::FILE_NOT_FOUND)
        );
        assert!(report.studies.iter().all(|s| s.status == StudyStatus::Invalid));
    }

    #[tokio::test]
    async fn test_omitted_output_becomes_internal_error() {
        let h = harness(EmulatedValidator {
            omit: ["skip1".to_string()].into_iter().collect(),
        });
        let (a, sum) = h.data_file("a.tsv", b"ok");

        let cb = accepted(
            h.service
                .submit(&request(vec![entry("keep1", &a, &sum), entry("skip1", &a, &sum)]))
                .unwrap(),
        );
        let reports = h
            .service
            .run_validation(&cb, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reports[0].status, StudyStatus::Valid);
        assert_eq!(reports[1].status, StudyStatus::Invalid);
        assert_eq!(reports[1].error_code, Some(codes::INTERNAL_PROCESSING_ERROR));
    }

    #[test]
    fn test_status_entry_count_matches_accepted_studies() {
        let h = harness(EmulatedValidator::default());
        let (a, sum) = h.data_file("a.tsv", b"ok");
        let entries = (0..7).map(|i| entry(&format!("study{}", i), &a, &sum)).collect();

        let cb = accepted(h.service.submit(&request(entries)).unwrap());
        let report = h.service.status(&cb).unwrap();

        assert_eq!(report.studies.len(), 7);
        assert_eq!(report.studies[3].id.as_str(), "study3");
        assert!(report.studies.iter().all(|s| s.status == StudyStatus::Retrieving));
    }

    #[test]
    fn test_accepted_payload_is_enqueued() {
        let mut h = harness(EmulatedValidator::default());
        let (a, sum) = h.data_file("a.tsv", b"ok");
        let cb = accepted(h.service.submit(&request(vec![entry("abcd1", &a, &sum)])).unwrap());

        let pending = h.pending.as_mut().unwrap();
        assert_eq!(pending.try_next(), Some(ValidationTask::new(cb)));
        assert_eq!(pending.try_next(), None);
    }

    #[test]
    fn test_duplicate_in_payload_rejects_everything() {
        let mut h = harness(EmulatedValidator::default());
        let (a, sum) = h.data_file("a.tsv", b"ok");

        let submission = h
            .service
            .submit(&request(vec![
                entry("abcd1", &a, &sum),
                entry("abcd2", &a, &sum),
                entry("abcd1", &a, &sum),
            ]))
            .unwrap();
        let Submission::Rejected {
            callback_id,
            errors,
        } = submission
        else {
            panic!("expected rejection");
        };

        assert_eq!(errors, vec!["study id 'abcd1' duplicated in payload"]);
        assert!(h.store.find_studies_by_callback(&callback_id).unwrap().is_empty());
        assert!(h
            .store
            .find_study(&StudyId::parse("abcd2").unwrap())
            .unwrap()
            .is_none());

        let report = h.service.status(&callback_id).unwrap();
        assert_eq!(report.status, PayloadStatus::Invalid);
        assert_eq!(report.metadata_errors, errors);
        assert!(report.studies.is_empty());
        assert_eq!(h.pending.as_mut().unwrap().try_next(), None);
    }

    #[test]
    fn test_existing_id_rejected_and_original_unchanged() {
        let h = harness(EmulatedValidator::default());
        let (a, sum) = h.data_file("a.tsv", b"ok");
        let first = accepted(h.service.submit(&request(vec![entry("abcd1", &a, &sum)])).unwrap());
        let original = h
            .store
            .find_study(&StudyId::parse("abcd1").unwrap())
            .unwrap()
            .unwrap();

        let second = h
            .service
            .submit(&request(vec![entry("abcd1", &a, "other"), entry("abcd9", &a, &sum)]))
            .unwrap();

        let Submission::Rejected { errors, .. } = second else {
            panic!("expected rejection");
        };
        assert_eq!(errors, vec!["study id 'abcd1' exists already"]);
        let after = h
            .store
            .find_study(&StudyId::parse("abcd1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(after, original);
        assert_eq!(after.callback_id, first);
        assert!(h
            .store
            .find_study(&StudyId::parse("abcd9").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unknown_callback_is_not_found() {
        let h = harness(EmulatedValidator::default());
        let err = h.service.status(&CallbackId::generate()).unwrap_err();
        assert!(matches!(err, SubmissionError::PayloadNotFound(_)));
    }

    #[test]
    fn test_update_publication() {
        let h = harness(EmulatedValidator::default());
        let (a, sum) = h.data_file("a.tsv", b"ok");
        let cb = accepted(
            h.service
                .submit(&request(vec![entry("abcd1", &a, &sum), entry("abcd2", &a, &sum)]))
                .unwrap(),
        );

        let report = h
            .service
            .update_publication(
                &cb,
                &UpdatePublicationReq {
                    request_entries: vec![PublicationEntry {
                        id: "abcd2".into(),
                        author_name: Some("Smith".into()),
                        pmid: Some("12345678".into()),
                        publication_ref: Some("GCP000001".into()),
                    }],
                },
            )
            .unwrap();

        assert_eq!(report.studies[0].publication_ref, None);
        assert_eq!(report.studies[1].publication_ref.as_deref(), Some("GCP000001"));
        let stored = h
            .store
            .find_study(&StudyId::parse("abcd2").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(stored.pmid.as_deref(), Some("12345678"));
        assert_eq!(stored.author_name.as_deref(), Some("Smith"));
    }

    #[test]
    fn test_update_publication_unknown_study_writes_nothing() {
        let h = harness(EmulatedValidator::default());
        let (a, sum) = h.data_file("a.tsv", b"ok");
        let cb = accepted(h.service.submit(&request(vec![entry("abcd1", &a, &sum)])).unwrap());

        let err = h
            .service
            .update_publication(
                &cb,
                &UpdatePublicationReq {
                    request_entries: vec![
                        PublicationEntry {
                            id: "abcd1".into(),
                            pmid: Some("1".into()),
                            ..PublicationEntry::default()
                        },
                        PublicationEntry {
                            id: "nope1".into(),
                            ..PublicationEntry::default()
                        },
                    ],
                },
            )
            .unwrap_err();

        let SubmissionError::StudiesNotInPayload { ids, .. } = err else {
            panic!("expected unknown-study error, got {:?}", err);
        };
        assert_eq!(ids, vec!["nope1"]);
        let stored = h
            .store
            .find_study(&StudyId::parse("abcd1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(stored.pmid, None);
    }

    #[tokio::test]
    async fn test_delete_removes_records_and_directories() {
        let h = harness(EmulatedValidator::default());
        let (a, sum) = h.data_file("a.tsv", b"ok");
        let cb = accepted(
            h.service
                .submit(&request(vec![entry("abcd1", &a, &sum), entry("abcd2", &a, &sum)]))
                .unwrap(),
        );
        h.service
            .run_validation(&cb, &CancellationToken::new())
            .await
            .unwrap();
        let work_dir = h.service.dispatcher.workspace().batch_dir(&cb);
        assert!(work_dir.exists());

        let report = h.service.delete(&cb).unwrap();
        assert_eq!(
            report.deleted,
            vec![StudyId::parse("abcd1").unwrap(), StudyId::parse("abcd2").unwrap()]
        );
        assert!(matches!(
            h.service.status(&cb),
            Err(SubmissionError::PayloadNotFound(_))
        ));
        assert!(h.store.find_studies_by_callback(&cb).unwrap().is_empty());

        for _ in 0..100 {
            if !work_dir.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!work_dir.exists());

        // Ids are free again; a late validation run for the deleted payload is a no-op.
        assert!(h
            .service
            .run_validation(&cb, &CancellationToken::new())
            .await
            .unwrap()
            .is_empty());
        accepted(h.service.submit(&request(vec![entry("abcd1", &a, &sum)])).unwrap());
    }

    #[tokio::test]
    async fn test_queue_drives_validation() {
        let mut h = harness(EmulatedValidator::default());
        let (a, sum) = h.data_file("a.tsv", b"ok");
        let cancel = CancellationToken::new();
        let pool = h.pending.take().unwrap().spawn_workers(
            h.service.clone(),
            2,
            3,
            cancel.clone(),
        );

        let cb = accepted(h.service.submit(&request(vec![entry("abcd1", &a, &sum)])).unwrap());
        let mut status = PayloadStatus::Processing;
        for _ in 0..200 {
            status = h.service.status(&cb).unwrap().status;
            if status != PayloadStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pool.shutdown().await;

        assert_eq!(status, PayloadStatus::Valid);
    }

    #[tokio::test]
    async fn test_shutdown_completes_queued_payloads() {
        let mut h = harness(EmulatedValidator::default());
        let (a, sum) = h.data_file("a.tsv", b"ok");
        let first = accepted(h.service.submit(&request(vec![entry("abcd1", &a, &sum)])).unwrap());
        let second = accepted(
            h.service
                .submit(&request(vec![entry("abcd2", &a, &sum), entry("abcd3", &a, &sum)]))
                .unwrap(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let pool = h
            .pending
            .take()
            .unwrap()
            .spawn_workers(h.service.clone(), 2, 3, cancel);
        pool.shutdown().await;

        for cb in [&first, &second] {
            let report = h.service.status(cb).unwrap();
            assert_eq!(report.status, PayloadStatus::Invalid);
            for study in &report.studies {
                assert_eq!(study.status, StudyStatus::Invalid);
                assert_eq!(study.error_code, Some(codes::INTERNAL_PROCESSING_ERROR));
            }
        }
    }

    #[tokio::test]
    async fn test_abandon_keeps_finished_results() {
        let h = harness(EmulatedValidator::default());
        let (a, sum) = h.data_file("a.tsv", b"ok");
        let cb = accepted(h.service.submit(&request(vec![entry("abcd1", &a, &sum)])).unwrap());
        h.service
            .run_validation(&cb, &CancellationToken::new())
            .await
            .unwrap();

        h.service.abandon(&ValidationTask::new(cb.clone())).await;

        assert_eq!(h.service.status(&cb).unwrap().status, PayloadStatus::Valid);
    }

    #[tokio::test]
    async fn test_restart_recovers_unfinished_payloads() {
        let dir = TempDir::new().unwrap();
        let (data, sum) = {
            let path = dir.path().join("a.tsv");
            std::fs::write(&path, b"ok").unwrap();
            (path, hex::encode(Sha256::digest(b"ok")))
        };
        let open = || Arc::new(FileStore::open(&dir.path().join("data")).unwrap());

        let (before, pending) = service_on(dir.path(), open(), EmulatedValidator::default());
        let unfinished =
            accepted(before.submit(&request(vec![entry("abcd1", &data, &sum)])).unwrap());
        let finished =
            accepted(before.submit(&request(vec![entry("abcd2", &data, &sum)])).unwrap());
        before
            .run_validation(&finished, &CancellationToken::new())
            .await
            .unwrap();
        let rejected = before
            .submit(&request(vec![entry("dupe1", &data, &sum), entry("dupe1", &data, &sum)]))
            .unwrap();
        assert!(matches!(rejected, Submission::Rejected { .. }));
        drop(pending);
        drop(before);

        let (after, mut pending) = service_on(dir.path(), open(), EmulatedValidator::default());
        let recovered = after.recover_pending().unwrap();

        assert_eq!(recovered, vec![unfinished.clone()]);
        assert_eq!(pending.try_next(), Some(ValidationTask::new(unfinished.clone())));
        assert_eq!(pending.try_next(), None);

        after
            .run_validation(&unfinished, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(after.status(&unfinished).unwrap().status, PayloadStatus::Valid);
        assert!(after.recover_pending().unwrap().is_empty());
    }
}
