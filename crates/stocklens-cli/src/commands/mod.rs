mod analyze;
mod show_config;

use std::process::ExitCode;

use stocklens_agent::AnalysisOutcome;
use stocklens_core::AnalysisConfig;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Exit code when placeholder records were substituted.
const EXIT_DEGRADED: u8 = 3;
/// Exit code when the deadline (or an interrupt) cancelled the run.
const EXIT_CANCELLED: u8 = 124;

pub async fn run(cli: &Cli, config: AnalysisConfig) -> Result<ExitCode, CliError> {
    match &cli.command {
        Command::Analyze(args) => {
            let outcome = analyze::run(args, config).await?;
            Ok(exit_code(&outcome))
        }
        Command::Config => {
            show_config::run(&config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(outcome: &AnalysisOutcome) -> ExitCode {
    match outcome {
        AnalysisOutcome::Completed { .. } => ExitCode::SUCCESS,
        AnalysisOutcome::Degraded { .. } => ExitCode::from(EXIT_DEGRADED),
        AnalysisOutcome::Cancelled { .. } => ExitCode::from(EXIT_CANCELLED),
    }
}
