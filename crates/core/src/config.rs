//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services as an
//! `Arc<CoreConfig>`. Nothing in the core reads environment variables while handling a request;
//! binaries call [`resolve_config`] with a lookup function (usually `std::env::var`).

use crate::constants::{
    DEFAULT_DATA_DIR, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_POLL_DURATION, DEFAULT_POLL_INTERVAL,
    DEFAULT_REMOTE_MEMORY_MB, DEFAULT_REMOTE_QUEUE, DEFAULT_VALIDATED_DIR, DEFAULT_WORKERS,
    DEFAULT_WORK_DIR,
};
use crate::dispatch::request::{is_safe_path, is_safe_token, split_command};
use crate::{SubmissionError, SubmissionResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DATA_DIR: &str = "SSV_DATA_DIR";
pub const ENV_WORK_DIR: &str = "SSV_WORK_DIR";
pub const ENV_VALIDATED_DIR: &str = "SSV_VALIDATED_DIR";
pub const ENV_MODE: &str = "SSV_MODE";
pub const ENV_LOCAL_COMMAND: &str = "SSV_LOCAL_COMMAND";
pub const ENV_REMOTE_HOST: &str = "SSV_REMOTE_HOST";
pub const ENV_REMOTE_USER: &str = "SSV_REMOTE_USER";
pub const ENV_REMOTE_ROOT: &str = "SSV_REMOTE_ROOT";
pub const ENV_REMOTE_QUEUE: &str = "SSV_REMOTE_QUEUE";
pub const ENV_REMOTE_MEMORY_MB: &str = "SSV_REMOTE_MEMORY_MB";
pub const ENV_REMOTE_COMMAND: &str = "SSV_REMOTE_COMMAND";
pub const ENV_POLL_INTERVAL_SECS: &str = "SSV_POLL_INTERVAL_SECS";
pub const ENV_MAX_POLL_SECS: &str = "SSV_MAX_POLL_SECS";
pub const ENV_WORKERS: &str = "SSV_WORKERS";
pub const ENV_MAX_ATTEMPTS: &str = "SSV_MAX_ATTEMPTS";
pub const ENV_CLEANUP_POLICY: &str = "SSV_CLEANUP_POLICY";
pub const ENV_STORE: &str = "SSV_STORE";

/// How validation jobs are executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationMode {
    /// Run `command` as a local subprocess.
    Local { command: String },
    /// Submit to a batch queue on a remote host over SSH.
    Remote(RemoteConfig),
}

/// Remote execution settings.
///
/// Every field ends up in an argv or a remote shell word, so [`CoreConfig::new`] restricts them
/// to a conservative character set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteConfig {
    pub host: String,
    pub user: Option<String>,
    /// Absolute directory on the remote host under which batch directories are created.
    pub remote_root: String,
    pub queue: String,
    pub memory_mb: u32,
    /// Pipeline command line on the remote host (whitespace separated words).
    pub command: String,
    pub submit_program: String,
    pub status_program: String,
    pub ssh_program: String,
    pub scp_program: String,
}

impl RemoteConfig {
    pub fn new(
        host: impl Into<String>,
        remote_root: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: None,
            remote_root: remote_root.into(),
            queue: DEFAULT_REMOTE_QUEUE.to_owned(),
            memory_mb: DEFAULT_REMOTE_MEMORY_MB,
            command: command.into(),
            submit_program: "bsub".to_owned(),
            status_program: "bjobs".to_owned(),
            ssh_program: "ssh".to_owned(),
            scp_program: "scp".to_owned(),
        }
    }

    /// `user@host`, or just `host` when no user is configured.
    pub fn target(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    fn validate(&self) -> SubmissionResult<()> {
        if !is_safe_token(&self.host) {
            return Err(invalid(format!("remote host '{}' is not allowed", self.host)));
        }
        if let Some(user) = &self.user {
            if !is_safe_token(user) {
                return Err(invalid(format!("remote user '{}' is not allowed", user)));
            }
        }
        if !self.remote_root.starts_with('/') || !is_safe_path(&self.remote_root) {
            return Err(invalid(format!(
                "remote root '{}' must be an absolute path of safe characters",
                self.remote_root
            )));
        }
        if !is_safe_token(&self.queue) {
            return Err(invalid(format!("remote queue '{}' is not allowed", self.queue)));
        }
        if self.memory_mb == 0 {
            return Err(invalid("remote memory request must be non-zero".into()));
        }
        split_command(&self.command)?;
        for program in [
            &self.submit_program,
            &self.status_program,
            &self.ssh_program,
            &self.scp_program,
        ] {
            if !is_safe_path(program) {
                return Err(invalid(format!("program '{}' is not allowed", program)));
            }
        }
        Ok(())
    }
}

/// Fixed pipeline settings serialised next to the manifest for every job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub minimum_rows: u64,
    pub accepted_assemblies: Vec<String>,
    pub accepted_extensions: Vec<String>,
    pub verify_checksum: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            minimum_rows: 100_000,
            accepted_assemblies: ["GRCh37", "GRCh38", "NCBI36", "NCBI35", "NCBI34"]
                .into_iter()
                .map(String::from)
                .collect(),
            accepted_extensions: ["tsv", "tsv.gz", "csv", "csv.gz", "txt", "txt.gz"]
                .into_iter()
                .map(String::from)
                .collect(),
            verify_checksum: true,
        }
    }
}

/// Which validated artifacts are purged when a batch has at least one failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArtifactCleanupPolicy {
    /// Purge artifacts of every study in the batch.
    #[default]
    WholeBatch,
    /// Purge only the artifacts of studies that failed.
    FailedOnly,
}

impl std::str::FromStr for ArtifactCleanupPolicy {
    type Err = SubmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whole-batch" | "whole_batch" | "batch" => Ok(ArtifactCleanupPolicy::WholeBatch),
            "failed-only" | "failed_only" | "failed" => Ok(ArtifactCleanupPolicy::FailedOnly),
            other => Err(invalid(format!("unknown cleanup policy '{}'", other))),
        }
    }
}

/// Record store backing the service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreKind {
    #[default]
    File,
    Memory,
}

impl std::str::FromStr for StoreKind {
    type Err = SubmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StoreKind::File),
            "memory" => Ok(StoreKind::Memory),
            other => Err(invalid(format!("unknown store kind '{}'", other))),
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    work_dir: PathBuf,
    validated_dir: PathBuf,
    mode: ValidationMode,
    pipeline: PipelineConfig,
    poll_interval: Duration,
    max_poll_duration: Duration,
    workers: usize,
    max_attempts: u32,
    cleanup_policy: ArtifactCleanupPolicy,
    store_kind: StoreKind,
}

impl CoreConfig {
    /// Create a new `CoreConfig` with default timing, pool and pipeline settings.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::InvalidConfig` if the validation mode carries an empty or
    /// unsafe command, or remote settings outside the allowed character set.
    pub fn new(
        data_dir: PathBuf,
        work_dir: PathBuf,
        validated_dir: PathBuf,
        mode: ValidationMode,
    ) -> SubmissionResult<Self> {
        match &mode {
            ValidationMode::Local { command } => {
                split_command(command)?;
            }
            ValidationMode::Remote(remote) => remote.validate()?,
        }

        Ok(Self {
            data_dir,
            work_dir,
            validated_dir,
            mode,
            pipeline: PipelineConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_duration: DEFAULT_MAX_POLL_DURATION,
            workers: DEFAULT_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            cleanup_policy: ArtifactCleanupPolicy::default(),
            store_kind: StoreKind::default(),
        })
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> SubmissionResult<Self> {
        if poll_interval.is_zero() {
            return Err(invalid("poll interval must be non-zero".into()));
        }
        self.poll_interval = poll_interval;
        Ok(self)
    }

    pub fn with_max_poll_duration(
        mut self,
        max_poll_duration: Duration,
    ) -> SubmissionResult<Self> {
        if max_poll_duration.is_zero() {
            return Err(invalid("maximum poll duration must be non-zero".into()));
        }
        self.max_poll_duration = max_poll_duration;
        Ok(self)
    }

    pub fn with_workers(mut self, workers: usize) -> SubmissionResult<Self> {
        if workers == 0 {
            return Err(invalid("worker count must be at least 1".into()));
        }
        self.workers = workers;
        Ok(self)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> SubmissionResult<Self> {
        if max_attempts == 0 {
            return Err(invalid("max attempts must be at least 1".into()));
        }
        self.max_attempts = max_attempts;
        Ok(self)
    }

    pub fn with_cleanup_policy(mut self, cleanup_policy: ArtifactCleanupPolicy) -> Self {
        self.cleanup_policy = cleanup_policy;
        self
    }

    pub fn with_store_kind(mut self, store_kind: StoreKind) -> Self {
        self.store_kind = store_kind;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn validated_dir(&self) -> &Path {
        &self.validated_dir
    }

    pub fn mode(&self) -> &ValidationMode {
        &self.mode
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn max_poll_duration(&self) -> Duration {
        self.max_poll_duration
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn cleanup_policy(&self) -> ArtifactCleanupPolicy {
        self.cleanup_policy
    }

    pub fn store_kind(&self) -> StoreKind {
        self.store_kind
    }
}

fn invalid(message: String) -> SubmissionError {
    SubmissionError::InvalidConfig(message)
}

/// Resolve a [`CoreConfig`] from `SSV_*` variables.
///
/// `lookup` returns the raw value of a variable, if set. Blank values are treated as unset.
///
/// # Errors
///
/// Returns `SubmissionError::InvalidConfig` for unparseable numbers, unknown enum values,
/// missing mandatory remote settings, or anything [`CoreConfig::new`] rejects.
pub fn resolve_config(lookup: impl Fn(&str) -> Option<String>) -> SubmissionResult<CoreConfig> {
    let get = |name: &str| {
        lookup(name)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    };
    let require = |name: &str| {
        get(name).ok_or_else(|| invalid(format!("{} must be set in remote mode", name)))
    };

    let dir = |name: &str, default: &str| {
        PathBuf::from(get(name).unwrap_or_else(|| default.to_owned()))
    };

    let mode_name = get(ENV_MODE).map(|m| m.to_ascii_lowercase());
    let mode = match mode_name.as_deref() {
        None | Some("local") => ValidationMode::Local {
            command: get(ENV_LOCAL_COMMAND).ok_or_else(|| {
                invalid(format!("{} must be set in local mode", ENV_LOCAL_COMMAND))
            })?,
        },
        Some("remote") => {
            let mut remote = RemoteConfig::new(
                require(ENV_REMOTE_HOST)?,
                require(ENV_REMOTE_ROOT)?,
                require(ENV_REMOTE_COMMAND)?,
            );
            remote.user = get(ENV_REMOTE_USER);
            if let Some(queue) = get(ENV_REMOTE_QUEUE) {
                remote.queue = queue;
            }
            let memory_mb = parse_number::<u32>(ENV_REMOTE_MEMORY_MB, get(ENV_REMOTE_MEMORY_MB))?;
            if let Some(memory_mb) = memory_mb {
                remote.memory_mb = memory_mb;
            }
            ValidationMode::Remote(remote)
        }
        Some(other) => {
            return Err(invalid(format!(
                "{} '{}' must be 'local' or 'remote'",
                ENV_MODE, other
            )))
        }
    };

    let mut cfg = CoreConfig::new(
        dir(ENV_DATA_DIR, DEFAULT_DATA_DIR),
        dir(ENV_WORK_DIR, DEFAULT_WORK_DIR),
        dir(ENV_VALIDATED_DIR, DEFAULT_VALIDATED_DIR),
        mode,
    )?;

    let poll_secs = parse_number::<u64>(ENV_POLL_INTERVAL_SECS, get(ENV_POLL_INTERVAL_SECS))?;
    if let Some(secs) = poll_secs {
        cfg = cfg.with_poll_interval(Duration::from_secs(secs))?;
    }
    if let Some(secs) = parse_number::<u64>(ENV_MAX_POLL_SECS, get(ENV_MAX_POLL_SECS))? {
        cfg = cfg.with_max_poll_duration(Duration::from_secs(secs))?;
    }
    if let Some(workers) = parse_number::<usize>(ENV_WORKERS, get(ENV_WORKERS))? {
        cfg = cfg.with_workers(workers)?;
    }
    if let Some(attempts) = parse_number::<u32>(ENV_MAX_ATTEMPTS, get(ENV_MAX_ATTEMPTS))? {
        cfg = cfg.with_max_attempts(attempts)?;
    }
    if let Some(policy) = get(ENV_CLEANUP_POLICY) {
        cfg = cfg.with_cleanup_policy(policy.parse()?);
    }
    if let Some(kind) = get(ENV_STORE) {
        cfg = cfg.with_store_kind(kind.parse()?);
    }

    Ok(cfg)
}

/// Parse an optional numeric variable value.
pub fn parse_number<T: std::str::FromStr>(
    name: &str,
    value: Option<String>,
) -> SubmissionResult<Option<T>> {
    value
        .map(|v| {
            v.parse::<T>().map_err(|_| {
                invalid(format!(
                    "{} must be a non-negative integer, got '{}'",
                    name, v
                ))
            })
        })
        .transpose()
}
