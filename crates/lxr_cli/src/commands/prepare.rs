//! Prepare command - Build the job container.

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::info;

use lxr_core::{ConfigResolver, Orchestrator, PrepareFlags, PrepareOptions};

use super::Context;

#[derive(Args, Debug)]
pub struct PrepareArgs {
    /// Proxmox storage holding the template
    #[arg(long)]
    storage: Option<String>,

    /// Container template to use
    #[arg(long)]
    image: Option<String>,

    /// Ignore the job's image and storage variables
    #[arg(long)]
    no_image_env: bool,

    /// Number of CPU cores
    #[arg(long)]
    cores: Option<u32>,

    /// Memory in MB
    #[arg(long)]
    memory: Option<u32>,

    /// Root disk size in GB
    #[arg(long)]
    disk: Option<u32>,

    /// Prefix for the container hostname
    #[arg(long)]
    hostname_prefix: Option<String>,

    /// Root password inside the container
    #[arg(long)]
    password: Option<String>,

    /// Readiness checks before giving up (one per interval)
    #[arg(long)]
    timeout: Option<u32>,
}

impl PrepareArgs {
    fn flags(&self, id: Option<u32>) -> PrepareFlags {
        PrepareFlags {
            id,
            storage: self.storage.clone(),
            image: self.image.clone(),
            no_image_env: self.no_image_env,
            cores: self.cores,
            memory_mb: self.memory,
            disk_gb: self.disk,
            hostname_prefix: self.hostname_prefix.clone(),
            password: self.password.clone(),
        }
    }
}

pub async fn execute(args: PrepareArgs, ctx: &Context) -> Result<()> {
    let spec = ConfigResolver::new(&ctx.settings.container).resolve(&args.flags(ctx.id), &ctx.env)?;
    let options = PrepareOptions {
        provision_script: ctx.settings.stages.provision_script()?,
        readiness_timeout: args.timeout.unwrap_or(ctx.settings.readiness.timeout_secs),
        fail_on_readiness_timeout: ctx.settings.readiness.fail_on_timeout,
    };

    let report = Orchestrator::new(ctx.tools.clone(), &ctx.settings)
        .prepare(&spec, &options)
        .await
        .with_context(|| format!("prepare failed for container {}", spec.id))?;

    info!(
        "Container {} ({}) prepared from {}",
        report.id, spec.hostname, report.image.image
    );
    Ok(())
}
