//! Validation dispatcher.
//!
//! One dispatch stages the batch inputs, starts the external validator through a
//! [`JobBackend`], polls it to completion and reads back its per-study output. Every failure on
//! the way (staging, transport, missing job id, unexpected status, timeout, cancellation) ends
//! as [`DispatchOutcome::Failed`]; nothing here returns an error to the caller, because the
//! aggregator must be able to turn any outcome into a complete status report.

pub mod backend;
mod local;
mod remote;
pub mod request;

pub use backend::{BatchJob, JobBackend, JobHandle, JobStatus};
pub use local::LocalBackend;
pub use remote::{parse_job_id, SshBackend};

use crate::config::{CoreConfig, PipelineConfig, ValidationMode};
use crate::constants::MAX_CONSECUTIVE_POLL_ERRORS;
use crate::error::SubmissionResult;
use crate::study::Study;
use serde::{de, Deserialize, Deserializer, Serialize};
use ssv_callback_id::CallbackId;
use ssv_files::{WorkspaceService, MANIFEST_FILE_NAME, PIPELINE_CONFIG_FILE_NAME};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One record of validator output.
///
/// The validator writes `retrieved`/`dataValid` as `0`/`1`; booleans are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutput {
    pub id: String,
    #[serde(deserialize_with = "flag")]
    pub retrieved: bool,
    #[serde(deserialize_with = "flag")]
    pub data_valid: bool,
    #[serde(default)]
    pub error_code: Option<u16>,
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(u64),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(n) => Err(de::Error::custom(format!("expected 0 or 1, got {}", n))),
    }
}

/// A result file holds either one record or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum ResultFile {
    One(JobOutput),
    Many(Vec<JobOutput>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The job ran to `DONE` or `EXIT`; these are the records it left behind.
    Completed(Vec<JobOutput>),
    /// No usable output; the reason is for logs only.
    Failed(String),
}

/// Study manifest handed to the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub callback_id: CallbackId,
    pub studies: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: String,
    pub file_path: String,
    pub checksum: String,
    pub assembly: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_ref: Option<String>,
}

impl Manifest {
    pub fn new(callback_id: &CallbackId, studies: &[Study]) -> Self {
        Self {
            callback_id: callback_id.clone(),
            studies: studies
                .iter()
                .map(|s| ManifestEntry {
                    id: s.id.to_string(),
                    file_path: s.file_path.to_string(),
                    checksum: s.checksum.to_string(),
                    assembly: s.assembly.to_string(),
                    readme: s.readme.clone(),
                    entry_ref: s.entry_ref.clone(),
                })
                .collect(),
        }
    }
}

/// Builds the backend selected by the configured validation mode.
pub fn backend_for(cfg: &CoreConfig) -> SubmissionResult<Arc<dyn JobBackend>> {
    Ok(match cfg.mode() {
        ValidationMode::Local { command } => Arc::new(LocalBackend::new(command)?),
        ValidationMode::Remote(remote) => Arc::new(SshBackend::new(remote.clone())),
    })
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    backend: Arc<dyn JobBackend>,
    workspace: WorkspaceService,
    pipeline: PipelineConfig,
    poll_interval: Duration,
    max_poll_duration: Duration,
}

impl Dispatcher {
    /// # Errors
    ///
    /// Returns an error if the work directory cannot be created.
    pub fn new(cfg: &CoreConfig, backend: Arc<dyn JobBackend>) -> SubmissionResult<Self> {
        std::fs::create_dir_all(cfg.work_dir())
            .map_err(crate::SubmissionError::StorageDirCreation)?;
        Ok(Self {
            backend,
            workspace: WorkspaceService::new(cfg.work_dir())?,
            pipeline: cfg.pipeline().clone(),
            poll_interval: cfg.poll_interval(),
            max_poll_duration: cfg.max_poll_duration(),
        })
    }

    pub fn workspace(&self) -> &WorkspaceService {
        &self.workspace
    }

    /// Runs one batch through the external validator.
    ///
    /// The `max_poll_duration` deadline covers submission and polling together. Backend cleanup
    /// is attempted once after every submission attempt.
    pub async fn dispatch(
        &self,
        callback_id: &CallbackId,
        studies: &[Study],
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let batch = match self.stage(callback_id, studies) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!("failed to stage batch {}: {:?}", callback_id, e);
                return DispatchOutcome::Failed(format!("staging failed: {}", e));
            }
        };

        let deadline = Instant::now() + self.max_poll_duration;
        let result = self.run(&batch, deadline, cancel).await;

        if let Err(e) = self.backend.cleanup(&batch).await {
            tracing::warn!(
                "{} cleanup for batch {} failed: {:?}",
                self.backend.name(),
                callback_id,
                e
            );
        }

        match result {
            Ok(outputs) => {
                tracing::info!(
                    "batch {} produced {} result record(s)",
                    callback_id,
                    outputs.len()
                );
                DispatchOutcome::Completed(outputs)
            }
            Err(reason) => {
                tracing::error!("dispatch of batch {} failed: {}", callback_id, reason);
                DispatchOutcome::Failed(reason)
            }
        }
    }

    fn stage(&self, callback_id: &CallbackId, studies: &[Study]) -> SubmissionResult<BatchJob> {
        let batch_dir = self.workspace.prepare(callback_id)?;
        let manifest_path = self.workspace.write_json(
            callback_id,
            MANIFEST_FILE_NAME,
            &Manifest::new(callback_id, studies),
        )?;
        let config_path =
            self.workspace
                .write_json(callback_id, PIPELINE_CONFIG_FILE_NAME, &self.pipeline)?;
        Ok(BatchJob {
            callback_id: callback_id.clone(),
            results_dir: self.workspace.results_dir(callback_id),
            batch_dir,
            manifest_path,
            config_path,
        })
    }

    async fn run(
        &self,
        batch: &BatchJob,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Vec<JobOutput>, String> {
        let handle = tokio::select! {
            _ = cancel.cancelled() => return Err("cancelled during submission".into()),
            _ = tokio::time::sleep_until(deadline) => {
                return Err("timed out during submission".into())
            }
            submitted = self.backend.submit(batch) => {
                submitted.map_err(|e| format!("submission failed: {}", e))?
            }
        };
        tracing::info!(
            "batch {} submitted via {} as job {}",
            batch.callback_id,
            self.backend.name(),
            handle
        );

        let status = self.poll_until_finished(&handle, deadline, cancel).await?;
        if status == JobStatus::Exit {
            tracing::warn!(
                "job {} for batch {} exited abnormally, collecting partial output",
                handle,
                batch.callback_id
            );
        }

        self.backend
            .fetch_results(&handle, batch)
            .await
            .map_err(|e| format!("fetching results failed: {}", e))?;
        self.read_outputs(&batch.callback_id)
    }

    async fn poll_until_finished(
        &self,
        handle: &JobHandle,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, String> {
        let mut consecutive_errors = 0;
        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => return Err("cancelled while polling".into()),
                polled = self.backend.poll_status(handle) => polled,
            };

            match polled {
                Ok(status) if status.is_finished() => return Ok(status),
                Ok(JobStatus::Pend) | Ok(JobStatus::Run) => consecutive_errors = 0,
                Ok(other) => {
                    return Err(format!(
                        "job {} reported unexpected status '{}'",
                        handle,
                        other.as_str()
                    ))
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        "status query for job {} failed ({}/{}): {:?}",
                        handle,
                        consecutive_errors,
                        MAX_CONSECUTIVE_POLL_ERRORS,
                        e
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                        return Err(format!(
                            "status queries for job {} keep failing: {}",
                            handle, e
                        ));
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(format!(
                    "job {} did not finish within {:?}",
                    handle, self.max_poll_duration
                ));
            }
            let wait = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err("cancelled while polling".into()),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Parses every result file. Unparseable files are skipped; the studies they would have
    /// covered are backfilled by the aggregator.
    fn read_outputs(&self, callback_id: &CallbackId) -> Result<Vec<JobOutput>, String> {
        let blobs = self
            .workspace
            .read_results(callback_id)
            .map_err(|e| format!("reading results failed: {}", e))?;

        let mut outputs = Vec::with_capacity(blobs.len());
        for blob in blobs {
            match serde_json::from_slice::<ResultFile>(&blob.contents) {
                Ok(ResultFile::One(output)) => outputs.push(output),
                Ok(ResultFile::Many(many)) => outputs.extend(many),
                Err(e) => tracing::warn!(
                    "ignoring unreadable result file {} for batch {}: {}",
                    blob.name,
                    callback_id,
                    e
                ),
            }
        }
        Ok(outputs)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend for dispatcher and service tests.

    use super::*;
    use crate::SubmissionError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct ScriptedBackend {
        pub submit_error: Option<String>,
        pub statuses: Mutex<VecDeque<SubmissionResult<JobStatus>>>,
        /// Written into the results dir on fetch, as `(file name, contents)`.
        pub results: Vec<(String, String)>,
        pub polls: Mutex<usize>,
        pub cleanups: Mutex<usize>,
    }

    impl ScriptedBackend {
        pub fn with_statuses(statuses: Vec<SubmissionResult<JobStatus>>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                ..Self::default()
            }
        }

        pub fn polls(&self) -> usize {
            *self.polls.lock().unwrap()
        }

        pub fn cleanups(&self) -> usize {
            *self.cleanups.lock().unwrap()
        }
    }

    #[async_trait]
    impl JobBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn submit(&self, _batch: &BatchJob) -> SubmissionResult<JobHandle> {
            match &self.submit_error {
                Some(reason) => Err(SubmissionError::Transport(reason.clone())),
                None => Ok(JobHandle("42".into())),
            }
        }

        async fn poll_status(&self, _handle: &JobHandle) -> SubmissionResult<JobStatus> {
            *self.polls.lock().unwrap() += 1;
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(JobStatus::Pend))
        }

        async fn fetch_results(
            &self,
            _handle: &JobHandle,
            batch: &BatchJob,
        ) -> SubmissionResult<()> {
            for (name, contents) in &self.results {
                std::fs::write(batch.results_dir.join(name), contents).unwrap();
            }
            Ok(())
        }

        async fn cleanup(&self, _batch: &BatchJob) -> SubmissionResult<()> {
            *self.cleanups.lock().unwrap() += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;
    use crate::study::fixtures::study;
    use crate::SubmissionError;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> CoreConfig {
        CoreConfig::new(
            dir.path().join("data"),
            dir.path().join("work"),
            dir.path().join("validated"),
            ValidationMode::Local {
                command: "true".into(),
            },
        )
        .unwrap()
        .with_poll_interval(Duration::from_secs(30))
        .unwrap()
        .with_max_poll_duration(Duration::from_secs(300))
        .unwrap()
    }

    fn dispatcher(dir: &TempDir, backend: Arc<ScriptedBackend>) -> Dispatcher {
        Dispatcher::new(&config(dir), backend).unwrap()
    }

    fn output(id: &str, retrieved: u8, data_valid: u8, code: Option<u16>) -> (String, String) {
        let code = code.map_or("null".to_string(), |c| c.to_string());
        (
            format!("{}.json", id),
            format!(
                r#"{{"id":"{}","retrieved":{},"dataValid":{},"errorCode":{}}}"#,
                id, retrieved, data_valid, code
            ),
        )
    }

    #[test]
    fn test_job_output_accepts_numeric_and_bool_flags() {
        let a: JobOutput =
            serde_json::from_str(r#"{"id":"abcd1","retrieved":1,"dataValid":0,"errorCode":7}"#)
                .unwrap();
        assert!(a.retrieved);
        assert!(!a.data_valid);
        assert_eq!(a.error_code, Some(7));

        let b: JobOutput =
            serde_json::from_str(r#"{"id":"abcd1","retrieved":true,"dataValid":true}"#).unwrap();
        assert!(b.data_valid);
        assert_eq!(b.error_code, None);

        assert!(serde_json::from_str::<JobOutput>(
            r#"{"id":"abcd1","retrieved":2,"dataValid":0}"#
        )
        .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_done_and_reads_results() {
        let dir = TempDir::new().unwrap();
        let mut backend = ScriptedBackend::with_statuses(vec![
            Ok(JobStatus::Pend),
            Ok(JobStatus::Run),
            Ok(JobStatus::Done),
        ]);
        backend.results = vec![output("abcd1", 1, 1, None), output("abcd2", 0, 0, Some(1))];
        backend.results.push(("junk.json".into(), "not json".into()));
        let backend = Arc::new(backend);
        let dispatcher = dispatcher(&dir, backend.clone());

        let cb = CallbackId::generate();
        let studies = vec![study("abcd1", &cb), study("abcd2", &cb)];
        let outcome = dispatcher
            .dispatch(&cb, &studies, &CancellationToken::new())
            .await;

        let DispatchOutcome::Completed(outputs) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].id, "abcd1");
        assert_eq!(outputs[1].error_code, Some(1));
        assert_eq!(backend.polls(), 3);
        assert_eq!(backend.cleanups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manifest_and_config_are_staged() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![Ok(JobStatus::Done)]));
        let dispatcher = dispatcher(&dir, backend);

        let cb = CallbackId::generate();
        let studies = vec![study("abcd1", &cb)];
        dispatcher
            .dispatch(&cb, &studies, &CancellationToken::new())
            .await;

        let batch_dir = dispatcher.workspace().batch_dir(&cb);
        let manifest: Manifest =
            serde_json::from_slice(&std::fs::read(batch_dir.join(MANIFEST_FILE_NAME)).unwrap())
                .unwrap();
        assert_eq!(manifest, Manifest::new(&cb, &studies));
        let pipeline: PipelineConfig = serde_json::from_slice(
            &std::fs::read(batch_dir.join(PIPELINE_CONFIG_FILE_NAME)).unwrap(),
        )
        .unwrap();
        assert_eq!(pipeline, PipelineConfig::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_failure_is_total_failure() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend {
            submit_error: Some("no job id in acknowledgement".into()),
            ..ScriptedBackend::default()
        });
        let dispatcher = dispatcher(&dir, backend.clone());

        let cb = CallbackId::generate();
        let outcome = dispatcher
            .dispatch(&cb, &[study("abcd1", &cb)], &CancellationToken::new())
            .await;

        assert!(matches!(outcome, DispatchOutcome::Failed(reason) if reason.contains("job id")));
        assert_eq!(backend.polls(), 0);
        assert_eq!(backend.cleanups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_status_is_total_failure() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![
            Ok(JobStatus::Pend),
            Ok(JobStatus::Unknown("ZOMBI".into())),
        ]));
        let dispatcher = dispatcher(&dir, backend.clone());

        let cb = CallbackId::generate();
        let outcome = dispatcher
            .dispatch(&cb, &[study("abcd1", &cb)], &CancellationToken::new())
            .await;

        assert!(matches!(outcome, DispatchOutcome::Failed(reason) if reason.contains("ZOMBI")));
        assert_eq!(backend.cleanups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::default());
        let dispatcher = dispatcher(&dir, backend.clone());

        let cb = CallbackId::generate();
        let outcome = dispatcher
            .dispatch(&cb, &[study("abcd1", &cb)], &CancellationToken::new())
            .await;

        assert!(
            matches!(outcome, DispatchOutcome::Failed(reason) if reason.contains("did not finish"))
        );
        // 300s budget polled every 30s: t = 0, 30, ..., 300.
        assert_eq!(backend.polls(), 11);
        assert_eq!(backend.cleanups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::default());
        let dispatcher = dispatcher(&dir, backend.clone());
        let cancel = CancellationToken::new();

        let cb = CallbackId::generate();
        let studies = vec![study("abcd1", &cb)];
        let (outcome, _) = tokio::join!(dispatcher.dispatch(&cb, &studies, &cancel), async {
            tokio::time::sleep(Duration::from_secs(45)).await;
            cancel.cancel();
        });

        assert!(matches!(outcome, DispatchOutcome::Failed(reason) if reason.contains("cancelled")));
        assert_eq!(backend.polls(), 2);
        assert_eq!(backend.cleanups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_errors_are_tolerated() {
        let dir = TempDir::new().unwrap();
        let transport = || Err(SubmissionError::Transport("ssh: connection reset".into()));
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![
            transport(),
            transport(),
            Ok(JobStatus::Run),
            transport(),
            Ok(JobStatus::Exit),
        ]));
        let dispatcher = dispatcher(&dir, backend.clone());

        let cb = CallbackId::generate();
        let outcome = dispatcher
            .dispatch(&cb, &[study("abcd1", &cb)], &CancellationToken::new())
            .await;
        assert_eq!(outcome, DispatchOutcome::Completed(vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_poll_errors_abandon_dispatch() {
        let dir = TempDir::new().unwrap();
        let transport = || Err(SubmissionError::Transport("ssh: no route to host".into()));
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![
            transport(),
            transport(),
            transport(),
            Ok(JobStatus::Done),
        ]));
        let dispatcher = dispatcher(&dir, backend.clone());

        let cb = CallbackId::generate();
        let outcome = dispatcher
            .dispatch(&cb, &[study("abcd1", &cb)], &CancellationToken::new())
            .await;

        assert!(
            matches!(outcome, DispatchOutcome::Failed(reason) if reason.contains("keep failing"))
        );
        assert_eq!(backend.polls(), 3);
    }
}
