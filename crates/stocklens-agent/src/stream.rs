//! # NDJSON Record Output
//!
//! Writes [`StreamRecord`]s in the output protocol, one
//! `{"type": <kind>, "data": <payload>}` object per line, and parses such
//! output back for validation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stocklens_agent::stream::NdjsonRecordWriter;
//! use std::io::stdout;
//!
//! let mut writer = NdjsonRecordWriter::new(stdout.lock());
//! while let Some(record) = analysis.next().await {
//!     writer.write_record(&record)?;
//! }
//! ```

use std::io::Write;

use stocklens_core::StreamRecord;

/// Writer for NDJSON records.
///
/// Each record is flushed as soon as it is written so downstream consumers see
/// it immediately.
///
/// # Thread Safety
///
/// This type is not thread-safe. Use one writer per output.
pub struct NdjsonRecordWriter<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> NdjsonRecordWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn write_record(&mut self, record: &StreamRecord) -> Result<(), StreamError> {
        let payload = serde_json::to_string(record)?;
        self.writer.write_all(payload.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn records_written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Error type for record output.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse NDJSON output back into records, strictly.
///
/// Unlike the streaming decoder this fails on the first bad line; it is meant
/// for validating produced output, not for consuming a live stream.
pub fn parse_records(input: &str) -> Result<Vec<StreamRecord>, RecordParseError> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|error| RecordParseError {
                line_number: index + 1,
                message: error.to_string(),
            })
        })
        .collect()
}

/// Error from [`parse_records`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("record parse error at line {line_number}: {message}")]
pub struct RecordParseError {
    /// 1-based line number where the error occurred.
    pub line_number: usize,
    pub message: String,
}
