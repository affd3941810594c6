//! Job submitter: hands batch scripts to the cluster scheduler.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{LaunchError, Result};

/// What happened to one script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionResult {
    /// The scheduler accepted the script.
    Submitted {
        /// Parsed from `Submitted batch job <id>` when the scheduler prints it.
        job_id: Option<String>,
        output: String,
    },
    /// Dry run: nothing was sent to the scheduler.
    DryRun,
}

impl SubmissionResult {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            SubmissionResult::Submitted { job_id, .. } => job_id.as_deref(),
            SubmissionResult::DryRun => None,
        }
    }
}

/// Runs `<command> <script>` for every script it is given.
#[derive(Debug, Clone)]
pub struct JobSubmitter {
    command: String,
    dry_run: bool,
}

impl JobSubmitter {
    pub fn new(command: impl Into<String>, dry_run: bool) -> Self {
        Self {
            command: command.into(),
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Submit one script. A non-zero exit is a [`LaunchError::Submission`].
    pub async fn submit(&self, script: &Path) -> Result<SubmissionResult> {
        if self.dry_run {
            debug!(script = %script.display(), "Dry run, not submitting");
            return Ok(SubmissionResult::DryRun);
        }

        let output = Command::new(&self.command)
            .arg(script)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                LaunchError::submission(script, format!("failed to run '{}': {e}", self.command))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LaunchError::submission(
                script,
                format!("{} exited with {}: {}", self.command, output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let job_id = parse_job_id(&stdout);
        info!(script = %script.display(), job_id = job_id.as_deref().unwrap_or("?"), "Submitted");
        Ok(SubmissionResult::Submitted {
            job_id,
            output: stdout,
        })
    }
}

/// Extract the id from `sbatch` output such as `Submitted batch job 4242`.
pub fn parse_job_id(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.trim()
            .strip_prefix("Submitted batch job")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_id() {
        assert_eq!(
            parse_job_id("Submitted batch job 4242\n"),
            Some("4242".to_string())
        );
        assert_eq!(parse_job_id("queued"), None);
        assert_eq!(parse_job_id("Submitted batch job "), None);
    }

    #[tokio::test]
    async fn test_dry_run_never_spawns() {
        let submitter = JobSubmitter::new("/definitely/not/a/scheduler", true);
        let result = submitter.submit(Path::new("/tmp/run.sh")).await.unwrap();
        assert_eq!(result, SubmissionResult::DryRun);
        assert_eq!(result.job_id(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_submission_captures_output() {
        let submitter = JobSubmitter::new("echo", false);
        let result = submitter.submit(Path::new("/tmp/run.sh")).await.unwrap();
        match result {
            SubmissionResult::Submitted { output, job_id } => {
                assert_eq!(output, "/tmp/run.sh");
                assert_eq!(job_id, None);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_scheduler_is_submission_error() {
        let submitter = JobSubmitter::new("false", false);
        let err = submitter
            .submit(Path::new("/tmp/run.sh"))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Submission { .. }));
        assert!(err.to_string().contains("/tmp/run.sh"));
    }

    #[tokio::test]
    async fn test_missing_scheduler_is_submission_error() {
        let submitter = JobSubmitter::new("/definitely/not/a/scheduler", false);
        let err = submitter
            .submit(Path::new("/tmp/run.sh"))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Submission { .. }));
    }
}
