//! Readiness polling after container start.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lxr_runner::HostTools;
use tracing::{debug, info, warn};

/// Outcome of [`ReadinessPoller::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The target became active on check number `attempts`.
    Ready { attempts: u32, elapsed: Duration },
    /// `attempts` checks ran and none succeeded.
    TimedOut { attempts: u32 },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Waits for a systemd target to become active inside a container.
#[derive(Clone)]
pub struct ReadinessPoller {
    tools: Arc<dyn HostTools>,
    target: String,
    interval: Duration,
    check_timeout: Duration,
}

impl ReadinessPoller {
    pub fn new(tools: Arc<dyn HostTools>, target: impl Into<String>) -> Self {
        Self {
            tools,
            target: target.into(),
            interval: Duration::from_secs(1),
            check_timeout: Duration::from_secs(10),
        }
    }

    /// Pause between checks (default one second).
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Deadline for one check; an expired check counts as not ready.
    pub fn check_timeout(mut self, limit: Duration) -> Self {
        self.check_timeout = limit;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Check the target up to `timeout` times, one interval apart.
    pub async fn wait(&self, id: u32, timeout: u32) -> Readiness {
        let started = Instant::now();

        for attempt in 1..=timeout {
            if self.is_active(id).await {
                let elapsed = started.elapsed();
                info!(
                    "Container {} reached {} after {} check(s), {}s",
                    id,
                    self.target,
                    attempt,
                    elapsed.as_secs()
                );
                return Readiness::Ready { attempts: attempt, elapsed };
            }
            if attempt < timeout {
                tokio::time::sleep(self.interval).await;
            }
        }

        warn!(
            "Container {} did not reach {} after {} check(s)",
            id, self.target, timeout
        );
        Readiness::TimedOut { attempts: timeout }
    }

    async fn is_active(&self, id: u32) -> bool {
        let command = vec![
            "systemctl".to_string(),
            "is-active".to_string(),
            "--quiet".to_string(),
            self.target.clone(),
        ];
        match tokio::time::timeout(self.check_timeout, self.tools.exec(id, &command)).await {
            Ok(Ok(output)) => output.success(),
            Ok(Err(e)) => {
                debug!("Readiness check on container {} failed: {}", id, e);
                false
            }
            Err(_) => {
                debug!(
                    "Readiness check on container {} gave no answer within {:?}",
                    id, self.check_timeout
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxr_runner::{MockContainer, MockHost};

    fn poller(host: &MockHost) -> ReadinessPoller {
        ReadinessPoller::new(Arc::new(host.clone()), "multi-user.target").interval(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_ready_on_first_check() {
        let host = MockHost::new().with_container(1, MockContainer::running("lxc-runner-1"));
        let readiness = poller(&host).wait(1, 60).await;

        assert!(matches!(readiness, Readiness::Ready { attempts: 1, .. }));
        assert_eq!(host.readiness_checks(1), 1);
    }

    #[tokio::test]
    async fn test_ready_after_some_failures() {
        let host = MockHost::new()
            .with_container(1, MockContainer::running("lxc-runner-1"))
            .ready_after(3);
        let readiness = poller(&host).wait(1, 10).await;

        assert!(matches!(readiness, Readiness::Ready { attempts: 4, .. }));
        assert_eq!(host.readiness_checks(1), 4);
    }

    #[tokio::test]
    async fn test_timeout_after_exactly_timeout_checks() {
        let host = MockHost::new()
            .with_container(4004, MockContainer::running("lxc-runner-4004"))
            .never_ready();
        let readiness = poller(&host).wait(4004, 5).await;

        assert_eq!(readiness, Readiness::TimedOut { attempts: 5 });
        assert!(!readiness.is_ready());
        assert_eq!(host.readiness_checks(4004), 5);
    }

    #[tokio::test]
    async fn test_exec_errors_count_as_not_ready() {
        let host = MockHost::new()
            .with_container(2, MockContainer::running("lxc-runner-2"))
            .fail_on("exec", Some(2));
        let readiness = poller(&host).wait(2, 3).await;

        assert_eq!(readiness, Readiness::TimedOut { attempts: 3 });
        assert_eq!(host.get_method_calls("exec").len(), 3);
    }

    #[tokio::test]
    async fn test_zero_timeout_performs_no_checks() {
        let host = MockHost::new().with_container(1, MockContainer::running("lxc-runner-1"));
        let readiness = poller(&host).wait(1, 0).await;

        assert_eq!(readiness, Readiness::TimedOut { attempts: 0 });
        assert!(!host.was_called("exec"));
    }

    #[tokio::test]
    async fn test_hanging_check_still_times_out() {
        let host = MockHost::new()
            .with_container(1, MockContainer::running("lxc-runner-1"))
            .hang_readiness();
        let started = Instant::now();

        let readiness = poller(&host)
            .check_timeout(Duration::from_millis(50))
            .wait(1, 3)
            .await;

        assert_eq!(readiness, Readiness::TimedOut { attempts: 3 });
        assert_eq!(host.readiness_checks(1), 3);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_check_command_targets_systemd() {
        let host = MockHost::new().with_container(1, MockContainer::running("lxc-runner-1"));
        poller(&host).wait(1, 1).await;

        let calls = host.get_method_calls("exec");
        assert_eq!(
            calls[0].args,
            ["systemctl", "is-active", "--quiet", "multi-user.target"]
        );
    }
}
