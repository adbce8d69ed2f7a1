//! CLI argument definitions for stocklens.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `analyze` | Run an analysis by replaying a recorded token stream |
//! | `config` | Print the effective configuration |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | JSON configuration file |
//! | `--max-retries` | from config | Retries when opening the stream |
//! | `--base-delay-ms` | from config | First backoff delay |
//! | `--max-delay-ms` | from config | Backoff ceiling |
//! | `--failure-threshold` | from config | Failures before the circuit opens |
//! | `--reset-timeout-ms` | from config | Open-circuit cool-down |
//! | `--max-line-bytes` | from config | Longest accepted record line |
//! | `--log-level` | `warn` | Log level when `RUST_LOG` is unset |
//! | `--log-json` | `false` | JSON log lines on stderr |
//!
//! # Examples
//!
//! ```bash
//! # Replay a captured response in 16-byte fragments
//! stocklens analyze AAPL --transcript aapl.ndjson --chunk-size 16
//!
//! # Simulate two transient failures before the stream opens
//! stocklens analyze AAPL --transcript aapl.ndjson --fail-opens 2 --fail-message TIMEOUT
//!
//! # Show the configuration a run would use
//! stocklens --config stocklens.json --max-retries 1 config
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// stocklens - resilient streaming stock analysis client
#[derive(Debug, Parser)]
#[command(
    name = "stocklens",
    author,
    version,
    about = "Resilient streaming stock analysis client",
    long_about = "stocklens drives a streaming AI stock analysis: it opens the token stream \
with retries and a circuit breaker, decodes newline-delimited JSON records as they arrive, \
and substitutes clearly marked placeholder records when live analysis is unavailable.\n\
\n\
Records are written to stdout as NDJSON; logs go to stderr."
)]
pub struct Cli {
    /// JSON configuration file with `retry`, `circuit_breaker` and
    /// `max_line_bytes` sections. Flags override file values.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    #[arg(long, global = true)]
    pub base_delay_ms: Option<u64>,

    #[arg(long, global = true)]
    pub max_delay_ms: Option<u64>,

    #[arg(long, global = true)]
    pub failure_threshold: Option<u32>,

    #[arg(long, global = true)]
    pub reset_timeout_ms: Option<u64>,

    #[arg(long, global = true)]
    pub max_line_bytes: Option<usize>,

    /// Default log level when `RUST_LOG` is not set.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analyse a symbol by replaying a recorded backend token stream.
    ///
    /// Exit codes: 0 when the analysis completed, 3 when placeholder records
    /// were substituted, 124 when the deadline cancelled the run.
    ///
    /// # Examples
    ///
    ///   stocklens analyze AAPL --transcript aapl.ndjson
    ///   stocklens analyze MSFT --transcript msft.ndjson --deadline-ms 2000
    Analyze(AnalyzeArgs),

    /// Print the effective configuration (file plus flags) as JSON.
    Config,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Ticker symbol to analyse (e.g., AAPL, BRK.B).
    pub symbol: String,

    /// Recorded NDJSON response to replay as the backend token stream.
    #[arg(long)]
    pub transcript: PathBuf,

    /// Free-form question about the symbol.
    #[arg(long)]
    pub question: Option<String>,

    #[arg(long, default_value = "en")]
    pub locale: String,

    /// Fragment size in bytes; fragments ignore line boundaries.
    #[arg(long, default_value_t = 64)]
    pub chunk_size: usize,

    /// Make the first N attempts to open the stream fail.
    #[arg(long, default_value_t = 0)]
    pub fail_opens: u32,

    /// Error message for the simulated open failures.
    #[arg(long, default_value = "replay backend unavailable")]
    pub fail_message: String,

    /// HTTP-like status attached to the simulated open failures.
    #[arg(long)]
    pub fail_status: Option<u16>,

    /// Break the stream after this many fragments.
    #[arg(long)]
    pub fail_after_fragments: Option<usize>,

    /// Cancel the run after this many milliseconds.
    #[arg(long)]
    pub deadline_ms: Option<u64>,
}
