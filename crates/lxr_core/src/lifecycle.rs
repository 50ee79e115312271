//! Container lifecycle: create, start, stop, destroy and state queries.
//!
//! A container is `Absent`, `Stopped` or `Running`. State is always read
//! fresh from `pct status`; nothing is cached because other actors on the
//! host can change it at any time.

use std::sync::Arc;
use std::time::Duration;

use lxr_runner::{parse_status, HostTools, ToolError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ContainerSpec;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Point-in-time state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Absent,
    Stopped,
    Running,
}

/// Outcome of [`ContainerLifecycle::destroy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destroyed {
    /// No container had the identifier; no command was issued.
    NothingToDo,
    Removed { was_running: bool },
}

impl Destroyed {
    pub fn existed(&self) -> bool {
        matches!(self, Self::Removed { .. })
    }
}

/// How often to retry `pct destroy` after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Extra attempts after the first (0 = no retry)
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Issues lifecycle commands for one host.
#[derive(Clone)]
pub struct ContainerLifecycle {
    tools: Arc<dyn HostTools>,
    destroy_retry: RetryPolicy,
}

impl ContainerLifecycle {
    pub fn new(tools: Arc<dyn HostTools>) -> Self {
        Self {
            tools,
            destroy_retry: RetryPolicy::none(),
        }
    }

    pub fn with_destroy_retry(mut self, policy: RetryPolicy) -> Self {
        self.destroy_retry = policy;
        self
    }

    /// Current state of container `id`.
    pub async fn state(&self, id: u32) -> OrchestratorResult<ContainerState> {
        let output = self
            .tools
            .status(id)
            .await
            .map_err(|source| OrchestratorError::ContainerQueryFailed { id, source })?;

        if !output.success() {
            debug!("Container {} absent: {}", id, output.stderr.trim());
            return Ok(ContainerState::Absent);
        }

        let status = parse_status(&output.stdout)
            .map_err(|source| OrchestratorError::ContainerQueryFailed { id, source })?;
        Ok(if status.is_running() {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        })
    }

    pub async fn exists(&self, id: u32) -> OrchestratorResult<bool> {
        Ok(self.state(id).await? != ContainerState::Absent)
    }

    pub async fn is_running(&self, id: u32) -> OrchestratorResult<bool> {
        Ok(self.state(id).await? == ContainerState::Running)
    }

    /// Create the container described by `spec`.
    ///
    /// The image must already be present in its storage; see
    /// [`ImageManager::ensure_present`](crate::image::ImageManager::ensure_present).
    pub async fn create(&self, spec: &ContainerSpec) -> OrchestratorResult<()> {
        info!("Creating container {} from {}", spec.id, spec.image);
        self.tools
            .create(spec.id, &spec.image.key(), &spec.create_options())
            .await
            .map_err(|source| OrchestratorError::ContainerCreateFailed { id: spec.id, source })
    }

    /// Request a start. Boot completion is observed by the readiness poller.
    pub async fn start(&self, id: u32) -> OrchestratorResult<()> {
        info!("Starting container {}", id);
        self.tools
            .start(id)
            .await
            .map_err(|source| OrchestratorError::ContainerStartFailed { id, source })
    }

    /// Stop the container if it is running. Returns whether a stop was issued.
    pub async fn stop(&self, id: u32) -> OrchestratorResult<bool> {
        if !self.is_running(id).await? {
            debug!("Container {} not running, nothing to stop", id);
            return Ok(false);
        }

        info!("Stopping container {}", id);
        self.tools
            .stop(id)
            .await
            .map_err(|source| OrchestratorError::ContainerStopFailed { id, source })?;
        Ok(true)
    }

    /// Remove the container whatever its state.
    pub async fn destroy(&self, id: u32) -> OrchestratorResult<Destroyed> {
        let was_running = match self.state(id).await? {
            ContainerState::Absent => {
                debug!("Container {} does not exist, nothing to destroy", id);
                return Ok(Destroyed::NothingToDo);
            }
            ContainerState::Running => {
                info!("Stopping container {}", id);
                self.tools
                    .stop(id)
                    .await
                    .map_err(|source| OrchestratorError::ContainerStopFailed { id, source })?;
                true
            }
            ContainerState::Stopped => false,
        };

        info!("Destroying container {}", id);
        self.destroy_with_retry(id)
            .await
            .map_err(|source| OrchestratorError::ContainerDestroyFailed { id, source })?;

        Ok(Destroyed::Removed { was_running })
    }

    async fn destroy_with_retry(&self, id: u32) -> Result<(), ToolError> {
        let mut attempt = 0;
        loop {
            match self.tools.destroy(id).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.destroy_retry.retries => {
                    attempt += 1;
                    warn!(
                        "Destroy of container {} failed ({}), retry {}/{}",
                        id, e, attempt, self.destroy_retry.retries
                    );
                    tokio::time::sleep(self.destroy_retry.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxr_runner::{MockContainer, MockHost};

    fn lifecycle(host: &MockHost) -> ContainerLifecycle {
        ContainerLifecycle::new(Arc::new(host.clone()))
    }

    #[tokio::test]
    async fn test_state_queries() {
        let host = MockHost::new()
            .with_container(1, MockContainer::running("lxc-runner-1"))
            .with_container(2, MockContainer::stopped("lxc-runner-2"));
        let lifecycle = lifecycle(&host);

        assert_eq!(lifecycle.state(1).await.unwrap(), ContainerState::Running);
        assert_eq!(lifecycle.state(2).await.unwrap(), ContainerState::Stopped);
        assert_eq!(lifecycle.state(3).await.unwrap(), ContainerState::Absent);
        assert!(lifecycle.exists(2).await.unwrap());
        assert!(!lifecycle.is_running(2).await.unwrap());
        assert!(!lifecycle.exists(3).await.unwrap());
    }

    #[tokio::test]
    async fn test_destroy_absent_is_nothing_to_do() {
        let host = MockHost::new();
        let result = lifecycle(&host).destroy(3003).await.unwrap();

        assert_eq!(result, Destroyed::NothingToDo);
        assert!(!result.existed());
        assert_eq!(host.call_count(), 1);
        assert!(host.was_called("status"));
        assert!(!host.was_called("stop"));
        assert!(!host.was_called("destroy"));
    }

    #[tokio::test]
    async fn test_destroy_running_stops_first() {
        let host = MockHost::new().with_container(5, MockContainer::running("lxc-runner-5"));
        let result = lifecycle(&host).destroy(5).await.unwrap();

        assert_eq!(result, Destroyed::Removed { was_running: true });
        let methods: Vec<String> = host.get_calls().into_iter().map(|c| c.method).collect();
        assert_eq!(methods, ["status", "stop", "destroy"]);
        assert!(host.container(5).is_none());
    }

    #[tokio::test]
    async fn test_destroy_stopped_skips_stop() {
        let host = MockHost::new().with_container(6, MockContainer::stopped("lxc-runner-6"));
        let result = lifecycle(&host).destroy(6).await.unwrap();

        assert_eq!(result, Destroyed::Removed { was_running: false });
        assert!(!host.was_called("stop"));
    }

    #[tokio::test]
    async fn test_stop_is_guarded_by_running_check() {
        let host = MockHost::new().with_container(8, MockContainer::stopped("lxc-runner-8"));
        let lifecycle = lifecycle(&host);

        assert!(!lifecycle.stop(8).await.unwrap());
        assert!(!lifecycle.stop(9).await.unwrap());
        assert!(!host.was_called("stop"));
    }

    #[tokio::test]
    async fn test_start_missing_container_fails() {
        let host = MockHost::new();
        let err = lifecycle(&host).start(4).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ContainerStartFailed { id: 4, .. }));
    }

    #[tokio::test]
    async fn test_destroy_without_retry_fails_once() {
        let host = MockHost::new()
            .with_container(2, MockContainer::stopped("lxc-runner-2"))
            .fail_on("destroy", Some(2));

        let err = lifecycle(&host).destroy(2).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ContainerDestroyFailed { id: 2, .. }));
        assert_eq!(host.get_method_calls("destroy").len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_retry_policy() {
        let host = MockHost::new()
            .with_container(2, MockContainer::stopped("lxc-runner-2"))
            .fail_on("destroy", Some(2));
        let lifecycle = lifecycle(&host).with_destroy_retry(RetryPolicy::none().retries(2));

        assert!(lifecycle.destroy(2).await.is_err());
        assert_eq!(host.get_method_calls("destroy").len(), 3);
    }
}
