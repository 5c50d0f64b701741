use crate::error::SubmissionResult;
use async_trait::async_trait;
use ssv_callback_id::CallbackId;
use std::fmt;
use std::path::PathBuf;

/// Local staging for one batch: where the job inputs were written and where results must end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub callback_id: CallbackId,
    pub batch_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub config_path: PathBuf,
    pub results_dir: PathBuf,
}

/// Identifier of a submitted job, as understood by the backend that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job state as reported by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pend,
    Run,
    Done,
    Exit,
    Unknown(String),
}

impl JobStatus {
    /// Parses an LSF `STAT` column value.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "PEND" | "PSUSP" | "WAIT" => JobStatus::Pend,
            "RUN" | "USUSP" | "SSUSP" => JobStatus::Run,
            "DONE" => JobStatus::Done,
            "EXIT" => JobStatus::Exit,
            other => JobStatus::Unknown(other.to_owned()),
        }
    }

    /// `DONE` and `EXIT` both mean the job left the queue and its output can be fetched.
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Exit)
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Pend => "PEND",
            JobStatus::Run => "RUN",
            JobStatus::Done => "DONE",
            JobStatus::Exit => "EXIT",
            JobStatus::Unknown(raw) => raw,
        }
    }
}

/// The seam between the dispatcher and whatever actually runs the external validator.
#[async_trait]
pub trait JobBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Starts the job for `batch`.
    ///
    /// # Errors
    ///
    /// Returns an error if the job could not be started or no job id could be obtained.
    async fn submit(&self, batch: &BatchJob) -> SubmissionResult<JobHandle>;

    async fn poll_status(&self, handle: &JobHandle) -> SubmissionResult<JobStatus>;

    /// Makes the job's result files available under `batch.results_dir`.
    async fn fetch_results(&self, handle: &JobHandle, batch: &BatchJob) -> SubmissionResult<()>;

    /// Releases anything the job left outside the local batch directory.
    ///
    /// Called once after every submit attempt, whether or not it succeeded.
    async fn cleanup(&self, batch: &BatchJob) -> SubmissionResult<()>;
}
