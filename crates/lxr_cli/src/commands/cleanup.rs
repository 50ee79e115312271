//! Cleanup command - Destroy containers.

use anyhow::Result;
use clap::Args;
use tracing::info;

use lxr_core::{CleanupReport, CleanupTarget, ConfigResolver, Orchestrator};

use super::Context;

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Destroy every lxc-runner container on this host
    #[arg(long)]
    all: bool,
}

pub async fn execute(args: CleanupArgs, ctx: &Context) -> Result<()> {
    let target = if args.all {
        CleanupTarget::All
    } else {
        CleanupTarget::One(ConfigResolver::resolve_id(ctx.id, &ctx.env)?)
    };

    match Orchestrator::new(ctx.tools.clone(), &ctx.settings)
        .cleanup(target)
        .await?
    {
        CleanupReport::One { id, existed: true } => info!("Container {} destroyed", id),
        CleanupReport::One { id, existed: false } => {
            info!("Container {} does not exist, nothing to do", id)
        }
        CleanupReport::All(sweep) => {
            info!("Destroyed {} container(s): {:?}", sweep.destroyed.len(), sweep.destroyed)
        }
    }
    Ok(())
}
