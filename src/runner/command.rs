use std::process::Stdio;

use tokio::process::Command;

use super::{AgentRunner, FeatureJob, RunFuture, RunnerError};

/// Characters of stderr kept in a failure message.
const STDERR_TAIL: usize = 2000;

/// Runs a shell command per feature.
///
/// The command runs through `sh -c` inside the project directory with the
/// feature described in `AUTOMODE_*` environment variables. Exit status 0 is
/// success; anything else is a failure carrying the tail of stderr.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    command: Option<String>,
}

impl CommandRunner {
    pub fn new(command: Option<String>) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.command.is_some()
    }
}

impl AgentRunner for CommandRunner {
    fn run_feature(&self, job: FeatureJob) -> Result<RunFuture, RunnerError> {
        let Some(command) = &self.command else {
            return Err(RunnerError::Rejected(
                "no agent command configured".to_string(),
            ));
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&job.key.project_path)
            .env("AUTOMODE_FEATURE_ID", &job.feature.id)
            .env("AUTOMODE_FEATURE_TITLE", &job.feature.title)
            .env("AUTOMODE_PROJECT_PATH", &job.key.project_path)
            .env(
                "AUTOMODE_BRANCH_NAME",
                job.key.branch_name.as_deref().unwrap_or(""),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let child = cmd.spawn()?;
        tracing::debug!(
            feature_id = %job.feature.id,
            pid = ?child.id(),
            "agent command spawned"
        );

        Ok(Box::pin(async move {
            let output = child
                .wait_with_output()
                .await
                .map_err(|e| format!("failed to wait for agent command: {}", e))?;

            if output.status.success() {
                return Ok(());
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr_tail(stderr.trim());
            Err(if tail.is_empty() {
                format!("agent command exited with {}", output.status)
            } else {
                format!("agent command exited with {}: {}", output.status, tail)
            })
        }))
    }
}

/// The last `STDERR_TAIL` characters of `stderr`.
fn stderr_tail(stderr: &str) -> &str {
    match stderr.char_indices().rev().nth(STDERR_TAIL - 1) {
        Some((idx, _)) => &stderr[idx..],
        None => stderr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Complexity, Feature, FeatureStatus, LoopKey};
    use chrono::Utc;

    fn job(project_path: &str) -> FeatureJob {
        FeatureJob {
            key: LoopKey::primary(project_path),
            feature: Feature {
                id: "f1".to_string(),
                project_path: project_path.to_string(),
                title: "First".to_string(),
                description: None,
                status: FeatureStatus::InProgress,
                dependencies: vec![],
                priority: 1,
                complexity: Complexity::Simple,
                branch_name: None,
                error: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    #[test]
    fn rejects_without_command() {
        let runner = CommandRunner::new(None);
        assert!(!runner.is_configured());
        assert!(matches!(
            runner.run_feature(job("/tmp")),
            Err(RunnerError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Some("test \"$AUTOMODE_FEATURE_ID\" = f1".into()));
        let run = runner
            .run_feature(job(dir.path().to_str().unwrap()))
            .unwrap();
        assert_eq!(run.await, Ok(()));
    }

    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(Some("echo boom >&2; exit 3".into()));
        let run = runner
            .run_feature(job(dir.path().to_str().unwrap()))
            .unwrap();
        let err = run.await.unwrap_err();
        assert!(err.contains("boom"), "unexpected message: {err}");
    }

    #[test]
    fn stderr_tail_keeps_exactly_the_last_characters() {
        let long = format!("{}{}", "x".repeat(10), "é".repeat(STDERR_TAIL));
        let tail = stderr_tail(&long);
        assert_eq!(tail.chars().count(), STDERR_TAIL);
        assert!(tail.chars().all(|c| c == 'é'));

        let exact = "y".repeat(STDERR_TAIL);
        assert_eq!(stderr_tail(&exact), exact);
        assert_eq!(stderr_tail("short"), "short");
    }
}
