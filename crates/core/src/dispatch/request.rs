//! Structured remote job requests.
//!
//! Remote jobs are started through `ssh`, which hands its command string to the remote login
//! shell. Nothing caller-controlled ever reaches that string: the request is built from the
//! callback id (canonical hex) and configuration values that passed [`is_safe_token`] /
//! [`is_safe_path`], and every word is single-quoted with [`shell_quote`] on top.

use crate::config::RemoteConfig;
use crate::error::{SubmissionError, SubmissionResult};
use ssv_callback_id::CallbackId;
use ssv_files::{MANIFEST_FILE_NAME, PIPELINE_CONFIG_FILE_NAME, RESULTS_DIR_NAME};

const JOB_NAME_PREFIX: &str = "ssv-";

/// True for a non-empty word of `[A-Za-z0-9._-]` that does not look like an option.
pub fn is_safe_token(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// True for a path of safe tokens separated by `/`, with no `..` component.
pub fn is_safe_path(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && value
            .split('/')
            .filter(|part| !part.is_empty())
            .all(|part| part != ".." && is_safe_token(part))
        && value.split('/').any(|part| !part.is_empty())
}

/// Splits a configured command line into argv words.
///
/// Words may contain `[A-Za-z0-9._/=:,+-]`; anything that a shell would interpret is rejected.
///
/// # Errors
///
/// Returns `SubmissionError::InvalidConfig` for an empty command or a disallowed character.
pub fn split_command(command: &str) -> SubmissionResult<Vec<String>> {
    let words: Vec<String> = command.split_whitespace().map(str::to_owned).collect();
    if words.is_empty() {
        return Err(SubmissionError::InvalidConfig(
            "validation command cannot be empty".into(),
        ));
    }
    for word in &words {
        let allowed = word.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(b, b'.' | b'_' | b'/' | b'=' | b':' | b',' | b'+' | b'-')
        });
        if !allowed {
            return Err(SubmissionError::InvalidConfig(format!(
                "validation command word '{}' contains disallowed characters",
                word
            )));
        }
    }
    Ok(words)
}

/// Quotes `word` for a POSIX shell.
pub fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// A batch-queue job name derived from a callback id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobName(String);

impl JobName {
    pub fn for_callback(callback_id: &CallbackId) -> Self {
        Self(format!("{}{}", JOB_NAME_PREFIX, callback_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Everything needed to stage, submit and clean up one remote batch job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub name: JobName,
    pub queue: String,
    pub memory_mb: u32,
    /// Remote batch directory: `<remote_root>/<callback_id>`.
    pub remote_dir: String,
    pub command: Vec<String>,
}

impl JobRequest {
    /// # Errors
    ///
    /// Returns `SubmissionError::InvalidJobRequest` if any configured value would need shell
    /// interpretation. [`crate::CoreConfig::new`] already rejects such configurations, so this
    /// only fires for a `RemoteConfig` built by hand.
    pub fn new(remote: &RemoteConfig, callback_id: &CallbackId) -> SubmissionResult<Self> {
        let root = remote.remote_root.trim_end_matches('/');
        let remote_dir = format!("{}/{}", root, callback_id);
        if !is_safe_path(&remote_dir) || !is_safe_token(&remote.queue) {
            return Err(SubmissionError::InvalidJobRequest(format!(
                "unsafe remote directory or queue for {}",
                callback_id
            )));
        }
        let command = split_command(&remote.command)
            .map_err(|e| SubmissionError::InvalidJobRequest(e.to_string()))?;

        Ok(Self {
            name: JobName::for_callback(callback_id),
            queue: remote.queue.clone(),
            memory_mb: remote.memory_mb,
            remote_dir,
            command,
        })
    }

    pub fn manifest_path(&self) -> String {
        format!("{}/{}", self.remote_dir, MANIFEST_FILE_NAME)
    }

    pub fn config_path(&self) -> String {
        format!("{}/{}", self.remote_dir, PIPELINE_CONFIG_FILE_NAME)
    }

    pub fn results_path(&self) -> String {
        format!("{}/{}", self.remote_dir, RESULTS_DIR_NAME)
    }

    /// The remote shell command that submits this job with `submit_program`.
    pub fn submit_command(&self, submit_program: &str) -> String {
        let memory = self.memory_mb.to_string();
        let stdout = format!("{}/job.out", self.remote_dir);
        let stderr = format!("{}/job.err", self.remote_dir);

        let mut words: Vec<&str> = vec![
            submit_program,
            "-J",
            self.name.as_str(),
            "-q",
            self.queue.as_str(),
            "-M",
            memory.as_str(),
            "-o",
            stdout.as_str(),
            "-e",
            stderr.as_str(),
        ];
        words.extend(self.command.iter().map(String::as_str));

        let manifest = self.manifest_path();
        let config = self.config_path();
        let results = self.results_path();
        words.extend([
            "--manifest",
            manifest.as_str(),
            "--config",
            config.as_str(),
            "--out",
            results.as_str(),
        ]);
        join_quoted(&words)
    }

    /// The remote shell command that creates the batch directory and its results subdirectory.
    pub fn prepare_command(&self) -> String {
        join_quoted(&["mkdir", "-p", &self.results_path()])
    }

    /// The remote shell command that removes the batch directory.
    pub fn cleanup_command(&self) -> String {
        join_quoted(&["rm", "-rf", &self.remote_dir])
    }
}

pub(crate) fn join_quoted(words: &[&str]) -> String {
    words
        .iter()
        .map(|w| shell_quote(w))
        .collect::<Vec<_>>()
        .join(" ")
}
