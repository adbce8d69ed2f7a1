mod cli;
mod commands;
mod config;
mod error;
mod telemetry;

use clap::Parser;
use std::process::ExitCode;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(code = error.exit_code(), "{error}");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_json, cli.log_level.into());

    let config = config::load(&cli)?;
    tracing::debug!(?config, "effective configuration");

    commands::run(&cli, config).await
}
