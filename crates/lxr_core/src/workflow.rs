//! The `prepare`, `run` and `cleanup` workflows.
//!
//! Steps run strictly in order and the first failure aborts the workflow.
//! Nothing is rolled back: a half-prepared container stays where it stopped
//! until the next `prepare` or `cleanup` removes it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lxr_runner::HostTools;
use tracing::{info, warn};

use crate::cleanup::{CleanupManager, SweepReport};
use crate::config::ContainerSpec;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::image::{EnsuredImage, ImageManager};
use crate::lifecycle::{ContainerLifecycle, Destroyed, RetryPolicy};
use crate::readiness::{Readiness, ReadinessPoller};
use crate::settings::Settings;
use crate::stage::{StageOutcome, StageRunner};

/// Stage name used for the provisioning script.
pub const PROVISION_STAGE: &str = "provisioning";

/// Knobs for one `prepare` run.
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    pub provision_script: PathBuf,
    /// Number of readiness checks
    pub readiness_timeout: u32,
    pub fail_on_readiness_timeout: bool,
}

/// What `prepare` did.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareReport {
    pub id: u32,
    pub stale: Destroyed,
    pub image: EnsuredImage,
    pub readiness: Readiness,
    pub provisioning: StageOutcome,
}

/// Which containers `cleanup` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTarget {
    One(u32),
    All,
}

/// What `cleanup` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupReport {
    One { id: u32, existed: bool },
    All(SweepReport),
}

/// Wires the components together for one host.
pub struct Orchestrator {
    images: ImageManager,
    lifecycle: ContainerLifecycle,
    readiness: ReadinessPoller,
    stages: StageRunner,
    cleanup: CleanupManager,
}

impl Orchestrator {
    pub fn new(tools: Arc<dyn HostTools>, settings: &Settings) -> Self {
        let retry = RetryPolicy::none()
            .retries(settings.cleanup.destroy_retries)
            .delay(std::time::Duration::from_millis(settings.cleanup.retry_delay_ms));
        let lifecycle = ContainerLifecycle::new(tools.clone()).with_destroy_retry(retry);

        Self {
            images: ImageManager::new(tools.clone()),
            readiness: ReadinessPoller::new(tools.clone(), settings.readiness.target.clone())
                .interval(settings.readiness.interval())
                .check_timeout(settings.readiness.check_timeout()),
            stages: StageRunner::new(tools.clone(), settings.stages.directory.clone()),
            cleanup: CleanupManager::new(
                tools,
                lifecycle.clone(),
                settings.container.name_marker.clone(),
            ),
            lifecycle,
        }
    }

    pub fn images(&self) -> &ImageManager {
        &self.images
    }

    pub fn lifecycle(&self) -> &ContainerLifecycle {
        &self.lifecycle
    }

    /// Destroy any stale container, then create, start, wait for and
    /// provision a fresh one.
    pub async fn prepare(
        &self,
        spec: &ContainerSpec,
        options: &PrepareOptions,
    ) -> OrchestratorResult<PrepareReport> {
        info!("Preparing container {}", spec.id);

        let stale = self.lifecycle.destroy(spec.id).await?;
        let image = self
            .images
            .ensure_present(spec.storage(), &spec.image.template)
            .await?;
        self.lifecycle.create(spec).await?;
        self.lifecycle.start(spec.id).await?;

        let readiness = self
            .readiness
            .wait(spec.id, options.readiness_timeout)
            .await;
        if let Readiness::TimedOut { attempts } = readiness {
            if options.fail_on_readiness_timeout {
                return Err(OrchestratorError::ReadinessTimeout {
                    id: spec.id,
                    target: self.readiness.target().to_string(),
                    attempts,
                });
            }
            warn!(
                "Container {} not ready after {} checks, provisioning anyway",
                spec.id, attempts
            );
        }

        info!("Provisioning container {}", spec.id);
        let provisioning = self
            .stages
            .run_checked(spec.id, &options.provision_script, PROVISION_STAGE)
            .await?;

        info!("Container {} ready", spec.id);
        Ok(PrepareReport {
            id: spec.id,
            stale,
            image,
            readiness,
            provisioning,
        })
    }

    /// Run one job stage script.
    pub async fn run(&self, id: u32, script: &Path, stage: &str) -> OrchestratorResult<StageOutcome> {
        info!("run: {} {}", stage, script.display());
        self.stages.run(id, script, stage).await
    }

    /// Remove one container or every runner container.
    pub async fn cleanup(&self, target: CleanupTarget) -> OrchestratorResult<CleanupReport> {
        match target {
            CleanupTarget::One(id) => Ok(CleanupReport::One {
                id,
                existed: self.cleanup.destroy_one(id).await?,
            }),
            CleanupTarget::All => Ok(CleanupReport::All(self.cleanup.destroy_all().await?)),
        }
    }
}
