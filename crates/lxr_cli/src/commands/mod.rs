//! CLI command definitions.
//!
//! GitLab's custom executor calls the driver once per phase: `prepare` to
//! build the container, `run` for every job stage, `cleanup` at the end.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lxr_core::{JobEnv, Settings};
use lxr_runner::HostTools;

pub mod cleanup;
pub mod prepare;
pub mod run;

/// lxc-runner - GitLab custom executor for Proxmox LXC containers
#[derive(Parser, Debug)]
#[command(name = "lxc-runner")]
#[command(version, about = "GitLab custom executor for Proxmox LXC containers")]
#[command(long_about = r#"
lxc-runner runs each CI job in its own throwaway LXC container on a Proxmox
VE host, driving pct and pveam.

WORKFLOWS:
  prepare   → Destroy stale container, ensure image, create, start, provision
  run       → Upload a stage script into the container and execute it
  cleanup   → Destroy the job's container (or all runner containers with --all)

EXIT CODES:
  0 - Success
  1 - Workflow failure
  2 - Invalid arguments
  3 - pct or pveam not found
  4 - No container id (use --id or CUSTOM_ENV_CI_JOB_ID)
  5 - Unknown command
"#)]
#[command(propagate_version = true)]
#[command(allow_external_subcommands = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Container id (defaults to CUSTOM_ENV_CI_JOB_ID)
    #[arg(long, global = true)]
    pub id: Option<u32>,

    /// Host settings file
    #[arg(long, global = true, env = "LXC_RUNNER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create, start and provision the job container
    Prepare(prepare::PrepareArgs),

    /// Run a stage script inside the job container
    Run(run::RunArgs),

    /// Destroy the job container
    Cleanup(cleanup::CleanupArgs),

    #[command(external_subcommand)]
    Unknown(Vec<String>),
}

/// Everything a command needs from its surroundings.
pub struct Context {
    pub tools: Arc<dyn HostTools>,
    pub settings: Settings,
    pub env: JobEnv,
    pub id: Option<u32>,
}
