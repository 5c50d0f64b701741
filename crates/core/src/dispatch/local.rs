//! Local subprocess backend.

use super::backend::{BatchJob, JobBackend, JobHandle, JobStatus};
use super::request::split_command;
use crate::error::{SubmissionError, SubmissionResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::Command;

/// Runs the validator as a child process and waits for it inside [`JobBackend::submit`].
///
/// The child is killed if the submitting future is dropped, so cancelling a dispatch also stops
/// the local job.
#[derive(Debug)]
pub struct LocalBackend {
    argv: Vec<String>,
    finished: Mutex<HashMap<JobHandle, JobStatus>>,
}

impl LocalBackend {
    /// # Errors
    ///
    /// Returns `SubmissionError::InvalidConfig` if `command` is empty or contains shell syntax.
    pub fn new(command: &str) -> SubmissionResult<Self> {
        Ok(Self {
            argv: split_command(command)?,
            finished: Mutex::new(HashMap::new()),
        })
    }

    fn command(&self, batch: &BatchJob) -> Command {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .arg("--manifest")
            .arg(&batch.manifest_path)
            .arg("--config")
            .arg(&batch.config_path)
            .arg("--out")
            .arg(&batch.results_dir)
            .current_dir(&batch.batch_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl JobBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn submit(&self, batch: &BatchJob) -> SubmissionResult<JobHandle> {
        let output = self.command(batch).output().await.map_err(|e| {
            SubmissionError::Transport(format!("failed to run {}: {}", self.argv[0], e))
        })?;

        let status = if output.status.success() {
            JobStatus::Done
        } else {
            tracing::warn!(
                "local validator for {} exited with {}: {}",
                batch.callback_id,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            JobStatus::Exit
        };

        let handle = JobHandle(format!("local-{}", batch.callback_id));
        self.finished
            .lock()
            .map_err(|_| SubmissionError::Transport("local job table poisoned".into()))?
            .insert(handle.clone(), status);
        Ok(handle)
    }

    async fn poll_status(&self, handle: &JobHandle) -> SubmissionResult<JobStatus> {
        let finished = self
            .finished
            .lock()
            .map_err(|_| SubmissionError::Transport("local job table poisoned".into()))?;
        Ok(finished
            .get(handle)
            .cloned()
            .unwrap_or_else(|| JobStatus::Unknown(format!("no local job {}", handle))))
    }

    /// Results are written straight into the local results directory.
    async fn fetch_results(&self, _handle: &JobHandle, _batch: &BatchJob) -> SubmissionResult<()> {
        Ok(())
    }

    async fn cleanup(&self, batch: &BatchJob) -> SubmissionResult<()> {
        if let Ok(mut finished) = self.finished.lock() {
            finished.remove(&JobHandle(format!("local-{}", batch.callback_id)));
        }
        Ok(())
    }
}
