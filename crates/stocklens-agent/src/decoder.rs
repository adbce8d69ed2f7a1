//! Incremental newline-delimited JSON decoder.
//!
//! Fragments arrive with arbitrary boundaries. The decoder buffers them and
//! yields a [`StreamRecord`] for every complete line that parses as a known
//! record kind. Bad lines are logged and dropped; they never surface as errors.

use serde_json::Value;
use stocklens_core::{RecordKind, StreamRecord, DEFAULT_MAX_LINE_BYTES};

/// Per-decoder line counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub decoded: u64,
    /// Lines that were not valid JSON or did not match their kind's payload.
    pub malformed: u64,
    /// Valid JSON with a kind this client does not know.
    pub unknown: u64,
    /// Lines longer than the configured bound.
    pub oversized: u64,
}

impl DecoderStats {
    pub const fn dropped(&self) -> u64 {
        self.malformed + self.unknown + self.oversized
    }
}

/// Turns text fragments into complete records.
///
/// A line longer than `max_line_bytes` is dropped whether it arrives whole or
/// in pieces: once the pending partial line exceeds the bound it is discarded
/// and the rest of that line is skipped up to the next newline.
#[derive(Debug)]
pub struct StreamingLineDecoder {
    buffer: String,
    max_line_bytes: usize,
    skipping_oversized: bool,
    stats: DecoderStats,
}

impl Default for StreamingLineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl StreamingLineDecoder {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            max_line_bytes: max_line_bytes.max(1),
            skipping_oversized: false,
            stats: DecoderStats::default(),
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes of the pending, not yet terminated line.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Append `fragment` and return every record completed by it, in order.
    pub fn feed(&mut self, fragment: &str) -> Vec<StreamRecord> {
        let mut fragment = fragment;
        if self.skipping_oversized {
            match fragment.find('\n') {
                Some(newline) => {
                    fragment = &fragment[newline + 1..];
                    self.skipping_oversized = false;
                }
                None => return Vec::new(),
            }
        }

        // The pending partial line never holds a newline, so only the new
        // bytes need scanning.
        let mut search_from = self.buffer.len();
        self.buffer.push_str(fragment);

        let mut records = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[search_from..].find('\n') {
            let end = search_from + offset;
            if let Some(record) = self.decode_line(consumed, end) {
                records.push(record);
            }
            consumed = end + 1;
            search_from = consumed;
        }
        self.buffer.drain(..consumed);

        if self.buffer.len() > self.max_line_bytes {
            tracing::warn!(
                buffered_bytes = self.buffer.len(),
                max_line_bytes = self.max_line_bytes,
                "discarding oversized partial line"
            );
            self.stats.oversized += 1;
            self.buffer.clear();
            self.skipping_oversized = true;
        }

        records
    }

    /// Decode the residual buffer as a final, unterminated line.
    ///
    /// Call once after the fragment source is exhausted.
    pub fn flush(&mut self) -> Option<StreamRecord> {
        if std::mem::take(&mut self.skipping_oversized) {
            self.buffer.clear();
            return None;
        }
        let end = self.buffer.len();
        let record = self.decode_line(0, end);
        self.buffer.clear();
        record
    }

    fn decode_line(&mut self, start: usize, end: usize) -> Option<StreamRecord> {
        if end - start > self.max_line_bytes {
            tracing::warn!(
                line_bytes = end - start,
                max_line_bytes = self.max_line_bytes,
                "dropping oversized line"
            );
            self.stats.oversized += 1;
            return None;
        }

        let line = self.buffer[start..end].trim();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str::<StreamRecord>(line) {
            Ok(record) => {
                self.stats.decoded += 1;
                Some(record)
            }
            Err(error) => {
                let tag = serde_json::from_str::<Value>(line).ok().and_then(|value| {
                    value.get("type").and_then(Value::as_str).map(str::to_owned)
                });
                match tag {
                    Some(tag) if RecordKind::from_tag(&tag).is_none() => {
                        tracing::debug!(kind = %tag, "ignoring record of unknown kind");
                        self.stats.unknown += 1;
                    }
                    _ => {
                        tracing::warn!(
                            error = %error,
                            line_bytes = line.len(),
                            "dropping malformed line"
                        );
                        self.stats.malformed += 1;
                    }
                }
                None
            }
        }
    }
}
