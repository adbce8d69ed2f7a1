use std::io::Write;

use stocklens_core::AnalysisConfig;

use crate::error::CliError;

pub fn run(config: &AnalysisConfig) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    write_config(config, &mut stdout)
}

fn write_config(config: &AnalysisConfig, writer: &mut impl Write) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut *writer, config)?;
    writeln!(writer)?;
    Ok(())
}
