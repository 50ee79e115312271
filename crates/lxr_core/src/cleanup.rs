//! Container removal, single and bulk.

use std::sync::Arc;

use lxr_runner::{parse_container_list, ContainerRecord, HostTools};
use tracing::{error, info};

use crate::error::{OrchestratorError, OrchestratorResult, SweepFailure};
use crate::lifecycle::ContainerLifecycle;

/// Containers removed by a successful sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub destroyed: Vec<u32>,
}

/// Destroys containers created by this runner.
#[derive(Clone)]
pub struct CleanupManager {
    tools: Arc<dyn HostTools>,
    lifecycle: ContainerLifecycle,
    marker: String,
}

impl CleanupManager {
    pub fn new(
        tools: Arc<dyn HostTools>,
        lifecycle: ContainerLifecycle,
        marker: impl Into<String>,
    ) -> Self {
        Self {
            tools,
            lifecycle,
            marker: marker.into(),
        }
    }

    /// Destroy container `id`. Returns whether it existed.
    pub async fn destroy_one(&self, id: u32) -> OrchestratorResult<bool> {
        Ok(self.lifecycle.destroy(id).await?.existed())
    }

    /// Containers on the host whose name carries the runner marker.
    pub async fn matching(&self) -> OrchestratorResult<Vec<ContainerRecord>> {
        let table = self
            .tools
            .list()
            .await
            .map_err(OrchestratorError::ListFailed)?;
        let records = parse_container_list(&table).map_err(OrchestratorError::ListFailed)?;

        Ok(records
            .into_iter()
            .filter(|record| record.name.contains(&self.marker))
            .collect())
    }

    /// Destroy every matching container.
    ///
    /// Each container is handled on its own; a failure is recorded and the
    /// sweep moves on. Failures are reported together once all containers
    /// have been attempted.
    pub async fn destroy_all(&self) -> OrchestratorResult<SweepReport> {
        let targets = self.matching().await?;
        info!(
            "Sweeping {} container(s) matching {:?}",
            targets.len(),
            self.marker
        );

        let mut destroyed = Vec::new();
        let mut failures = Vec::new();
        for record in targets {
            match self.lifecycle.destroy(record.id).await {
                Ok(result) if result.existed() => destroyed.push(record.id),
                Ok(_) => info!("Container {} vanished before destroy", record.id),
                Err(e) => {
                    error!("Failed to destroy container {}: {}", record.id, e);
                    failures.push(SweepFailure {
                        id: record.id,
                        error: Box::new(e),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(SweepReport { destroyed })
        } else {
            Err(OrchestratorError::CleanupPartialFailure {
                destroyed,
                failures,
            })
        }
    }
}
