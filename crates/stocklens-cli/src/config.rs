use std::fs;
use std::path::Path;
use std::time::Duration;

use stocklens_core::AnalysisConfig;

use crate::cli::Cli;
use crate::error::CliError;

/// Build the effective configuration: defaults, then the config file, then
/// flags. The result is validated.
pub fn load(cli: &Cli) -> Result<AnalysisConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => read_file(path)?,
        None => AnalysisConfig::default(),
    };

    if let Some(max_retries) = cli.max_retries {
        config.retry.max_retries = max_retries;
    }
    if let Some(ms) = cli.base_delay_ms {
        config.retry.base_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = cli.max_delay_ms {
        config.retry.max_delay = Duration::from_millis(ms);
    }
    if let Some(threshold) = cli.failure_threshold {
        config.circuit_breaker.failure_threshold = threshold;
    }
    if let Some(ms) = cli.reset_timeout_ms {
        config.circuit_breaker.reset_timeout = Duration::from_millis(ms);
    }
    if let Some(bytes) = cli.max_line_bytes {
        config.max_line_bytes = bytes;
    }

    config.validate()?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<AnalysisConfig, CliError> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    AnalysisConfig::from_json(&raw).map_err(|source| CliError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}
