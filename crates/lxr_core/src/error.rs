//! Error types for the orchestrator.

use std::fmt;
use std::path::PathBuf;

use lxr_runner::ToolError;
use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// One container that could not be destroyed during a sweep.
#[derive(Debug)]
pub struct SweepFailure {
    pub id: u32,
    pub error: Box<OrchestratorError>,
}

impl fmt::Display for SweepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.error)
    }
}

/// Errors that can occur while driving a container.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Required tool unavailable: {0}")]
    ToolUnavailable(#[source] ToolError),

    #[error("Container identifier unresolved: {0}")]
    ConfigUnresolved(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load settings from {path}: {message}")]
    Settings { path: PathBuf, message: String },

    #[error("Image query failed: {0}")]
    ImageQueryFailed(#[source] ToolError),

    #[error("Image download failed for {image}: {source}")]
    ImageDownloadFailed {
        image: String,
        #[source]
        source: ToolError,
    },

    #[error("Container {id} query failed: {source}")]
    ContainerQueryFailed {
        id: u32,
        #[source]
        source: ToolError,
    },

    #[error("Container listing failed: {0}")]
    ListFailed(#[source] ToolError),

    #[error("Container {id} create failed: {source}")]
    ContainerCreateFailed {
        id: u32,
        #[source]
        source: ToolError,
    },

    #[error("Container {id} start failed: {source}")]
    ContainerStartFailed {
        id: u32,
        #[source]
        source: ToolError,
    },

    #[error("Container {id} stop failed: {source}")]
    ContainerStopFailed {
        id: u32,
        #[source]
        source: ToolError,
    },

    #[error("Container {id} destroy failed: {source}")]
    ContainerDestroyFailed {
        id: u32,
        #[source]
        source: ToolError,
    },

    #[error("Container {id} not ready after {attempts} checks of {target}")]
    ReadinessTimeout {
        id: u32,
        target: String,
        attempts: u32,
    },

    #[error("Stage {stage} upload failed: {message}")]
    StageUploadFailed {
        stage: String,
        message: String,
        #[source]
        source: Option<ToolError>,
    },

    #[error("Stage {stage} execution failed: {message}")]
    StageExecutionFailed {
        stage: String,
        /// Remote exit status, when the script ran to completion
        exit_code: Option<i32>,
        message: String,
        #[source]
        source: Option<ToolError>,
    },

    #[error("Cleanup destroyed {} container(s) but failed for {}: {}", .destroyed.len(), .failures.len(), join(.failures))]
    CleanupPartialFailure {
        destroyed: Vec<u32>,
        failures: Vec<SweepFailure>,
    },
}

fn join(failures: &[SweepFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
