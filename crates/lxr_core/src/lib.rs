//! # lxr_core
//!
//! Lifecycle orchestration for single-job LXC containers.
//!
//! Components, leaves first:
//!
//! - [`ConfigResolver`]: flags + job environment + host defaults → [`ContainerSpec`]
//! - [`ImageManager`]: template presence and download
//! - [`ContainerLifecycle`]: create/start/stop/destroy and state queries
//! - [`ReadinessPoller`]: waits for the init system after start
//! - [`StageRunner`]: uploads and runs stage scripts
//! - [`CleanupManager`]: destroys one container or sweeps all runner containers
//!
//! [`Orchestrator`] strings them together into the `prepare`, `run` and
//! `cleanup` workflows.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod image;
pub mod lifecycle;
pub mod readiness;
pub mod settings;
pub mod stage;
pub mod workflow;

pub use cleanup::{CleanupManager, SweepReport};
pub use config::{
    vars, ConfigResolver, ContainerSpec, ImageReference, JobContext, JobEnv, PrepareFlags,
    RootPassword,
};
pub use error::{OrchestratorError, OrchestratorResult, SweepFailure};
pub use image::{EnsuredImage, ImageManager, SYSTEM_SECTION};
pub use lifecycle::{ContainerLifecycle, ContainerState, Destroyed, RetryPolicy};
pub use readiness::{Readiness, ReadinessPoller};
pub use settings::Settings;
pub use stage::{StageOutcome, StageRunner};
pub use workflow::{
    CleanupReport, CleanupTarget, Orchestrator, PrepareOptions, PrepareReport, PROVISION_STAGE,
};
