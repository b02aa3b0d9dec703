//! Invocation of the external signature classifier.
//!
//! The classifier is an opaque program launched once per request with the
//! reference and test artifact paths as its last two arguments. It must print
//! one result record as the first line of standard output; standard error is
//! captured for diagnostics only.

use crate::artifact_store::UploadedArtifact;
use crate::config::ClassifierConfig;
use crate::error::PredictionError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Anything able to compare a reference and a test artifact
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Return the raw result record for the pair
    async fn classify(
        &self,
        reference: &UploadedArtifact,
        test: &UploadedArtifact,
    ) -> Result<String, PredictionError>;
}

/// Classifier running as a child process
#[derive(Debug, Clone)]
pub struct ProcessClassifier {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ProcessClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Override the wall-clock budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self, reference: &UploadedArtifact, test: &UploadedArtifact) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&reference.path)
            .arg(&test.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl Classifier for ProcessClassifier {
    #[instrument(skip_all, fields(program = %self.program))]
    async fn classify(
        &self,
        reference: &UploadedArtifact,
        test: &UploadedArtifact,
    ) -> Result<String, PredictionError> {
        let started = Instant::now();

        let mut child = self
            .command(reference, test)
            .spawn()
            .map_err(|e| PredictionError::ClassifierExecution {
                reason: format!("failed to launch {}: {e}", self.program),
                stderr: String::new(),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = timeout(self.timeout, async {
            tokio::try_join!(child.wait(), read_stream(stdout), read_stream(stderr))
        })
        .await;

        metrics::histogram!("verifier_classifier_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let (status, stdout, stderr) = match run {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(PredictionError::ClassifierExecution {
                    reason: format!("failed to collect classifier output: {e}"),
                    stderr: String::new(),
                })
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out classifier");
                }
                return Err(PredictionError::ClassifierTimeout(self.timeout));
            }
        };

        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        if !status.success() {
            return Err(PredictionError::ClassifierExecution {
                reason: format!("classifier exited with {status}"),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&stdout);
        let Some(record) = first_record(&stdout) else {
            return Err(PredictionError::ClassifierExecution {
                reason: "classifier produced no output".to_string(),
                stderr,
            });
        };

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            stderr_bytes = stderr.len(),
            "Classifier finished"
        );

        Ok(record.to_string())
    }
}

/// Drain a child pipe to the end
async fn read_stream<R>(stream: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// First line of output, or `None` when it is blank
fn first_record(stdout: &str) -> Option<&str> {
    let line = stdout.lines().next()?.trim_end_matches('\r');
    if line.trim().is_empty() {
        None
    } else {
        Some(line)
    }
}
