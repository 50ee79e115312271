//! Stage script upload and execution.

use std::path::Path;
use std::sync::Arc;

use lxr_runner::{HostTools, PushOptions};
use tracing::{error, info};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Result of a stage that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    /// Exit status of the script inside the container
    pub exit_code: i32,
}

impl StageOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs job stage scripts inside a container.
#[derive(Clone)]
pub struct StageRunner {
    tools: Arc<dyn HostTools>,
    directory: String,
}

impl StageRunner {
    pub fn new(tools: Arc<dyn HostTools>, directory: impl Into<String>) -> Self {
        Self {
            tools,
            directory: directory.into(),
        }
    }

    /// Slot inside the container that holds the script for `stage`.
    pub fn remote_path(&self, stage: &str) -> String {
        format!("{}/{}", self.directory.trim_end_matches('/'), stage)
    }

    /// Upload `script` into the stage slot and execute it.
    ///
    /// A non-zero exit of the script is reported in the outcome, not as an
    /// error.
    pub async fn run(
        &self,
        id: u32,
        script: &Path,
        stage: &str,
    ) -> OrchestratorResult<StageOutcome> {
        let upload_failed = |message: String| OrchestratorError::StageUploadFailed {
            stage: stage.to_string(),
            message,
            source: None,
        };

        if matches!(stage, "" | "." | "..") || stage.contains('/') {
            return Err(upload_failed(format!("invalid stage name {:?}", stage)));
        }
        if !script.is_file() {
            return Err(upload_failed(format!(
                "script {} does not exist",
                script.display()
            )));
        }

        let remote = self.remote_path(stage);
        info!("Uploading {} to container {} as {}", script.display(), id, remote);
        self.tools
            .push(id, script, &remote, &PushOptions::executable())
            .await
            .map_err(|source| OrchestratorError::StageUploadFailed {
                stage: stage.to_string(),
                message: format!("push to {} failed", remote),
                source: Some(source),
            })?;

        info!("Running stage {}", stage);
        let output = self
            .tools
            .exec(id, &[remote])
            .await
            .map_err(|source| OrchestratorError::StageExecutionFailed {
                stage: stage.to_string(),
                exit_code: None,
                message: "could not execute script".to_string(),
                source: Some(source),
            })?;

        if !output.success() {
            error!("Stage {} exited with code {}", stage, output.exit_code);
        }
        Ok(StageOutcome {
            exit_code: output.exit_code,
        })
    }

    /// Like [`run`](Self::run), but a non-zero exit becomes
    /// [`OrchestratorError::StageExecutionFailed`].
    pub async fn run_checked(
        &self,
        id: u32,
        script: &Path,
        stage: &str,
    ) -> OrchestratorResult<StageOutcome> {
        let outcome = self.run(id, script, stage).await?;
        if outcome.success() {
            Ok(outcome)
        } else {
            Err(OrchestratorError::StageExecutionFailed {
                stage: stage.to_string(),
                exit_code: Some(outcome.exit_code),
                message: format!("script exited with code {}", outcome.exit_code),
                source: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxr_runner::{MockContainer, MockHost};
    use std::path::PathBuf;

    fn script(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "#!/bin/sh\necho hi\n").unwrap();
        path
    }

    fn runner(host: &MockHost) -> StageRunner {
        StageRunner::new(Arc::new(host.clone()), "/usr/local/bin")
    }

    #[tokio::test]
    async fn test_run_uploads_then_executes() {
        let dir = tempfile::tempdir().unwrap();
        let local = script(&dir, "step.sh");
        let host = MockHost::new().with_container(3, MockContainer::running("lxc-runner-3"));

        let outcome = runner(&host).run(3, &local, "build_script").await.unwrap();

        assert!(outcome.success());
        let pushed = host.pushed_file(3, "/usr/local/bin/build_script").unwrap();
        assert_eq!(pushed.options, PushOptions::executable());
        let methods: Vec<String> = host.get_calls().into_iter().map(|c| c.method).collect();
        assert_eq!(methods, ["push", "exec"]);
        assert_eq!(host.get_method_calls("exec")[0].args, ["/usr/local/bin/build_script"]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let local = script(&dir, "step.sh");
        let host = MockHost::new()
            .with_container(3, MockContainer::running("lxc-runner-3"))
            .script_exit_code("/usr/local/bin/step_script", 42);
        let runner = runner(&host);

        let outcome = runner.run(3, &local, "step_script").await.unwrap();
        assert_eq!(outcome.exit_code, 42);

        let err = runner.run_checked(3, &local, "step_script").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::StageExecutionFailed { exit_code: Some(42), .. }
        ));
    }

    #[tokio::test]
    async fn test_upload_failure_skips_execution() {
        let dir = tempfile::tempdir().unwrap();
        let local = script(&dir, "step.sh");
        let host = MockHost::new()
            .with_container(3, MockContainer::running("lxc-runner-3"))
            .fail_on("push", Some(3));

        let err = runner(&host).run(3, &local, "build_script").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::StageUploadFailed { source: Some(_), .. }));
        assert!(!host.was_called("exec"));
    }

    #[tokio::test]
    async fn test_missing_local_script() {
        let host = MockHost::new().with_container(3, MockContainer::running("lxc-runner-3"));
        let err = runner(&host)
            .run(3, Path::new("/nonexistent/step.sh"), "build_script")
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::StageUploadFailed { .. }));
        assert_eq!(host.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_stage_name() {
        let dir = tempfile::tempdir().unwrap();
        let local = script(&dir, "step.sh");
        let host = MockHost::new().with_container(3, MockContainer::running("lxc-runner-3"));

        assert!(runner(&host).run(3, &local, "").await.is_err());
        assert!(runner(&host).run(3, &local, "../etc/passwd").await.is_err());
        assert!(runner(&host).run(3, &local, ".").await.is_err());
        assert!(runner(&host).run(3, &local, "..").await.is_err());
        assert_eq!(host.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exec_error_is_execution_failure() {
        let dir = tempfile::tempdir().unwrap();
        let local = script(&dir, "step.sh");
        let host = MockHost::new()
            .with_container(3, MockContainer::running("lxc-runner-3"))
            .fail_on("exec", Some(3));

        let err = runner(&host).run(3, &local, "build_script").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::StageExecutionFailed { exit_code: None, .. }
        ));
    }

    #[test]
    fn test_remote_path_is_one_slot_per_stage() {
        let runner = StageRunner::new(Arc::new(MockHost::new()), "/usr/local/bin/");
        assert_eq!(runner.remote_path("build_script"), "/usr/local/bin/build_script");
    }
}
