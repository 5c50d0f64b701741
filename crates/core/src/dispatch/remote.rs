//! Remote batch-queue backend over SSH.
//!
//! Each operation is a separate `ssh`/`scp` invocation built as a structured argv. Remote shell
//! commands come from [`JobRequest`], which only ever contains validated words.

use super::backend::{BatchJob, JobBackend, JobHandle, JobStatus};
use super::request::{is_safe_token, join_quoted, JobRequest};
use crate::config::RemoteConfig;
use crate::error::{SubmissionError, SubmissionResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

static JOB_ACK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Job <(\d+)>").expect("job acknowledgement pattern is valid"));

/// Extracts the job id from a submission acknowledgement such as
/// `Job <4821> is submitted to queue <standard>.`
pub fn parse_job_id(ack: &str) -> Option<String> {
    JOB_ACK_PATTERN
        .captures(ack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}

#[derive(Debug, Clone)]
pub struct SshBackend {
    remote: RemoteConfig,
}

impl SshBackend {
    pub fn new(remote: RemoteConfig) -> Self {
        Self { remote }
    }

    pub fn ssh_argv(&self, remote_command: String) -> Vec<String> {
        vec![
            self.remote.ssh_program.clone(),
            "-o".into(),
            "BatchMode=yes".into(),
            "--".into(),
            self.remote.target(),
            remote_command,
        ]
    }

    pub fn upload_argv(&self, request: &JobRequest, batch: &BatchJob) -> Vec<String> {
        vec![
            self.remote.scp_program.clone(),
            "-q".into(),
            "-B".into(),
            "--".into(),
            path_arg(&batch.manifest_path),
            path_arg(&batch.config_path),
            format!("{}:{}/", self.remote.target(), request.remote_dir),
        ]
    }

    pub fn download_argv(&self, request: &JobRequest, batch: &BatchJob) -> Vec<String> {
        vec![
            self.remote.scp_program.clone(),
            "-q".into(),
            "-B".into(),
            "-r".into(),
            "--".into(),
            format!("{}:{}", self.remote.target(), request.results_path()),
            path_arg(&batch.batch_dir),
        ]
    }

    pub fn status_command(&self, handle: &JobHandle) -> SubmissionResult<String> {
        if !is_safe_token(&handle.0) {
            return Err(SubmissionError::InvalidJobRequest(format!(
                "job id '{}' is not allowed",
                handle
            )));
        }
        Ok(join_quoted(&[
            &self.remote.status_program,
            "-noheader",
            "-o",
            "stat",
            &handle.0,
        ]))
    }

    fn request(&self, batch: &BatchJob) -> SubmissionResult<JobRequest> {
        JobRequest::new(&self.remote, &batch.callback_id)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Runs `argv` and returns its stdout. A non-zero exit is a transport error.
async fn run(argv: &[String]) -> SubmissionResult<String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| SubmissionError::Transport("empty command".into()))?;

    tracing::debug!("running {} {:?}", program, args);
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SubmissionError::Transport(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        return Err(SubmissionError::Transport(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl JobBackend for SshBackend {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn submit(&self, batch: &BatchJob) -> SubmissionResult<JobHandle> {
        let request = self.request(batch)?;

        run(&self.ssh_argv(request.prepare_command())).await?;
        run(&self.upload_argv(&request, batch)).await?;
        let ack = run(&self.ssh_argv(
            request.submit_command(&self.remote.submit_program),
        ))
        .await?;

        match parse_job_id(&ack) {
            Some(id) => {
                tracing::info!(
                    "submitted {} as remote job {} on {}",
                    request.name.as_str(),
                    id,
                    self.remote.host
                );
                Ok(JobHandle(id))
            }
            None => Err(SubmissionError::Transport(format!(
                "no job id in submission acknowledgement: '{}'",
                ack.trim()
            ))),
        }
    }

    async fn poll_status(&self, handle: &JobHandle) -> SubmissionResult<JobStatus> {
        let out = run(&self.ssh_argv(self.status_command(handle)?)).await?;
        let stat = out.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        Ok(JobStatus::parse(stat))
    }

    async fn fetch_results(&self, _handle: &JobHandle, batch: &BatchJob) -> SubmissionResult<()> {
        let request = self.request(batch)?;
        run(&self.download_argv(&request, batch)).await?;
        Ok(())
    }

    async fn cleanup(&self, batch: &BatchJob) -> SubmissionResult<()> {
        let request = self.request(batch)?;
        run(&self.ssh_argv(request.cleanup_command())).await?;
        Ok(())
    }
}


#[cfg(all(test, unix))]
mod session_tests {
    //! Drives the backend end to end against shell stand-ins for `ssh`, `scp`, `bsub` and
    //! `bjobs` that act on a local directory playing the remote host.

    use super::*;
    use crate::config::{CoreConfig, ValidationMode};
    use crate::dispatch::{DispatchOutcome, Dispatcher, JobOutput};
    use crate::study::fixtures::study;
    use ssv_callback_id::CallbackId;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    const ACK: &str = "Job <7> is submitted to queue <standard>.";

    /// Runs the remote command locally.
    const SSH: &str = r#"shift 4
exec sh -c "$1"
"#;

    /// Drops options, strips `host:` prefixes and copies.
    const SCP: &str = r#"while [ "$1" != "--" ]; do shift; done
shift
for arg do
  shift
  set -- "$@" "${arg#*:}"
done
exec cp -R "$@"
"#;

    /// Writes two result records into the `--out` directory and acknowledges.
    const BSUB: &str = r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--out" ]; then out="$2"; fi
  shift
done
mkdir -p "$out"
printf '%s' '{"id":"abcd1","retrieved":1,"dataValid":1,"errorCode":null}' > "$out/abcd1.json"
printf '%s' '{"id":"abcd2","retrieved":1,"dataValid":0,"errorCode":7}' > "$out/abcd2.json"
echo "@ACK@"
"#;

    /// Reports RUN on the first query, then the final state. Only knows job 7.
    const BJOBS: &str = r#"[ "$4" = "7" ] || { echo "job <$4> is not found" >&2; exit 255; }
if [ -e "@STATE@" ]; then
  echo "@FINAL@"
else
  : > "@STATE@"
  echo "RUN"
fi
"#;

    struct Session {
        dir: TempDir,
        root: PathBuf,
        backend: Arc<SshBackend>,
    }

    fn script(bin: &Path, name: &str, body: &str) -> String {
        let path = bin.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path_arg(&path)
    }

    fn session(ack: &str, final_status: &str) -> Session {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        let root = dir.path().join("remote");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::create_dir_all(&root).unwrap();

        let state = path_arg(&bin.join("polled"));
        let mut remote = RemoteConfig::new("codon", path_arg(&root), "validate");
        remote.ssh_program = script(&bin, "ssh", SSH);
        remote.scp_program = script(&bin, "scp", SCP);
        remote.submit_program = script(&bin, "bsub", &BSUB.replace("@ACK@", ack));
        remote.status_program = script(
            &bin,
            "bjobs",
            &BJOBS
                .replace("@STATE@", &state)
                .replace("@FINAL@", final_status),
        );
        Session {
            dir,
            root,
            backend: Arc::new(SshBackend::new(remote)),
        }
    }

    impl Session {
        fn dispatcher(&self) -> Dispatcher {
            let cfg = CoreConfig::new(
                self.dir.path().join("data"),
                self.dir.path().join("work"),
                self.dir.path().join("validated"),
                ValidationMode::Local {
                    command: "true".into(),
                },
            )
            .unwrap()
            .with_poll_interval(Duration::from_millis(10))
            .unwrap()
            .with_max_poll_duration(Duration::from_secs(30))
            .unwrap();
            Dispatcher::new(&cfg, self.backend.clone()).unwrap()
        }

        fn remote_dir(&self, cb: &CallbackId) -> PathBuf {
            self.root.join(cb.to_string())
        }

        fn polled(&self) -> bool {
            self.dir.path().join("bin").join("polled").exists()
        }

        /// A staged batch outside the dispatcher, for calling the backend directly.
        fn batch(&self, cb: &CallbackId) -> BatchJob {
            let batch_dir = self.dir.path().join("local").join(cb.to_string());
            std::fs::create_dir_all(batch_dir.join("results")).unwrap();
            std::fs::write(batch_dir.join("manifest.json"), b"{}").unwrap();
            std::fs::write(batch_dir.join("pipeline.json"), b"{}").unwrap();
            BatchJob {
                callback_id: cb.clone(),
                manifest_path: batch_dir.join("manifest.json"),
                config_path: batch_dir.join("pipeline.json"),
                results_dir: batch_dir.join("results"),
                batch_dir,
            }
        }
    }

    async fn run_batch(session: &Session, cb: &CallbackId) -> DispatchOutcome {
        session
            .dispatcher()
            .dispatch(
                cb,
                &[study("abcd1", cb), study("abcd2", cb)],
                &CancellationToken::new(),
            )
            .await
    }

    fn completed(outcome: DispatchOutcome) -> Vec<JobOutput> {
        match outcome {
            DispatchOutcome::Completed(mut outputs) => {
                outputs.sort_by(|a, b| a.id.cmp(&b.id));
                outputs
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_done_job_results_are_downloaded() {
        let s = session(ACK, "DONE");
        let cb = CallbackId::generate();

        let outputs = completed(run_batch(&s, &cb).await);

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].id, "abcd1");
        assert!(outputs[0].data_valid);
        assert_eq!(outputs[1].error_code, Some(7));
        assert!(!outputs[1].data_valid);
        assert!(s.polled());
        assert!(!s.remote_dir(&cb).exists());
    }

    #[tokio::test]
    async fn test_exited_job_output_is_still_collected() {
        let s = session(ACK, "EXIT");
        let cb = CallbackId::generate();

        let outputs = completed(run_batch(&s, &cb).await);

        assert_eq!(outputs.len(), 2);
        assert!(!s.remote_dir(&cb).exists());
    }

    #[tokio::test]
    async fn test_missing_job_id_fails_batch_and_cleans_up() {
        let s = session("Request aborted by esub. Job not submitted.", "DONE");
        let cb = CallbackId::generate();

        let outcome = run_batch(&s, &cb).await;

        assert!(
            matches!(&outcome, DispatchOutcome::Failed(reason) if reason.contains("no job id")),
            "{:?}",
            outcome
        );
        assert!(!s.polled());
        assert!(!s.remote_dir(&cb).exists());
    }

    #[tokio::test]
    async fn test_backend_operations_act_on_remote_dir() {
        let s = session(ACK, "DONE");
        let cb = CallbackId::generate();
        let batch = s.batch(&cb);

        let handle = s.backend.submit(&batch).await.unwrap();
        assert_eq!(handle, JobHandle("7".into()));
        assert!(s.remote_dir(&cb).join("manifest.json").exists());
        assert!(s.remote_dir(&cb).join("pipeline.json").exists());

        assert_eq!(s.backend.poll_status(&handle).await.unwrap(), JobStatus::Run);
        assert_eq!(s.backend.poll_status(&handle).await.unwrap(), JobStatus::Done);
        assert!(matches!(
            s.backend.poll_status(&JobHandle("8".into())).await,
            Err(SubmissionError::Transport(_))
        ));

        s.backend.fetch_results(&handle, &batch).await.unwrap();
        assert!(batch.results_dir.join("abcd1.json").exists());
        assert!(batch.results_dir.join("abcd2.json").exists());

        s.backend.cleanup(&batch).await.unwrap();
        assert!(!s.remote_dir(&cb).exists());
    }

    #[tokio::test]
    async fn test_unacknowledged_submit_is_transport_error() {
        let s = session("", "DONE");
        let cb = CallbackId::generate();

        let err = s.backend.submit(&s.batch(&cb)).await.unwrap_err();

        assert!(matches!(err, SubmissionError::Transport(ref m) if m.contains("no job id")));
    }
}
