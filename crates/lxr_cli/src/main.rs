//! lxc-runner - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: Workflow failure
//! - 2: Invalid arguments
//! - 3: pct or pveam not found
//! - 4: Container id unresolved
//! - 5: Unknown command
//!
//! Stage script failures use `$BUILD_FAILURE_EXIT_CODE` and other workflow
//! failures `$SYSTEM_FAILURE_EXIT_CODE` when the runner provides them.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lxr_core::{JobEnv, OrchestratorError, Settings};
use lxr_runner::{PveCli, PveCliOptions, ToolPaths};

mod commands;

use commands::{Cli, Commands, Context};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const TOOL_UNAVAILABLE: u8 = 3;
    pub const ID_UNRESOLVED: u8 = 4;
    pub const UNKNOWN_COMMAND: u8 = 5;
}

const BUILD_FAILURE_EXIT_CODE: &str = "BUILD_FAILURE_EXIT_CODE";
const SYSTEM_FAILURE_EXIT_CODE: &str = "SYSTEM_FAILURE_EXIT_CODE";

/// A subcommand clap passed through unrecognised.
#[derive(Debug)]
struct UnknownCommand(Vec<String>);

impl std::fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown command: {}", self.0.join(" "))
    }
}

impl std::error::Error for UnknownCommand {}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(if e.use_stderr() {
                ExitCodes::INVALID_ARGS
            } else {
                ExitCodes::SUCCESS
            });
        }
    };

    init_logging(&cli);

    // Only a job script's own exit status counts as a build failure.
    let runs_job_script = matches!(cli.command, Commands::Run(_));

    match dispatch(cli).await {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let lookup = |name: &str| std::env::var(name).ok();
            let exit_code = categorize_error(&e, runs_job_script, lookup);
            error!("{:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lxr={level},lxc_runner={level},warn")));

    // Logging already initialized is not an error.
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .try_init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        command, config, id, ..
    } = cli;

    match command {
        Commands::Prepare(args) => {
            commands::prepare::execute(args, &context(config.as_deref(), id)?).await
        }
        Commands::Run(args) => commands::run::execute(args, &context(config.as_deref(), id)?).await,
        Commands::Cleanup(args) => {
            commands::cleanup::execute(args, &context(config.as_deref(), id)?).await
        }
        Commands::Unknown(args) => Err(UnknownCommand(args).into()),
    }
}

fn context(config: Option<&Path>, id: Option<u32>) -> Result<Context> {
    let settings = Settings::load(config)?;
    let paths = ToolPaths::resolve().map_err(OrchestratorError::ToolUnavailable)?;
    debug!("Using pct at {:?}, pveam at {:?}", paths.pct, paths.pveam);

    let options = PveCliOptions::new()
        .command_timeout(settings.tools.command_timeout())
        .exec_timeout(settings.tools.exec_timeout());

    Ok(Context {
        tools: Arc::new(PveCli::new(paths, options)),
        settings,
        env: JobEnv::from_process(),
        id,
    })
}

/// Categorize error to determine exit code
fn categorize_error<F>(e: &anyhow::Error, runs_job_script: bool, lookup: F) -> u8
where
    F: Fn(&str) -> Option<String>,
{
    let from_env = |name: &str| {
        lookup(name)
            .and_then(|v| v.trim().parse::<u8>().ok())
            .unwrap_or(ExitCodes::GENERAL_ERROR)
    };

    if e.downcast_ref::<UnknownCommand>().is_some() {
        return ExitCodes::UNKNOWN_COMMAND;
    }

    match e.downcast_ref::<OrchestratorError>() {
        Some(OrchestratorError::ToolUnavailable(_)) => ExitCodes::TOOL_UNAVAILABLE,
        Some(OrchestratorError::ConfigUnresolved(_)) => ExitCodes::ID_UNRESOLVED,
        Some(OrchestratorError::StageExecutionFailed {
            exit_code: Some(_), ..
        }) if runs_job_script => from_env(BUILD_FAILURE_EXIT_CODE),
        _ => from_env(SYSTEM_FAILURE_EXIT_CODE),
    }
}
