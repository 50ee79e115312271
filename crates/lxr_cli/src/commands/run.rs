//! Run command - Execute one job stage.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use lxr_core::{ConfigResolver, Orchestrator, OrchestratorError};

use super::Context;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Script generated by the runner for this stage
    script: PathBuf,

    /// Stage name (e.g. build_script)
    stage: String,
}

pub async fn execute(args: RunArgs, ctx: &Context) -> Result<()> {
    let id = ConfigResolver::resolve_id(ctx.id, &ctx.env)?;

    let outcome = Orchestrator::new(ctx.tools.clone(), &ctx.settings)
        .run(id, &args.script, &args.stage)
        .await?;

    if outcome.success() {
        Ok(())
    } else {
        Err(OrchestratorError::StageExecutionFailed {
            stage: args.stage,
            exit_code: Some(outcome.exit_code),
            message: format!("script exited with code {}", outcome.exit_code),
            source: None,
        }
        .into())
    }
}
