//! # stocklens-agent
//!
//! Resilient streaming analysis client for stocklens.
//!
//! ## Overview
//!
//! This crate turns a backend token stream into typed analysis records while
//! the stream is still arriving. Opening the stream goes through the retry
//! executor and circuit breaker from `stocklens-core`; decoded records are
//! delivered in order, citations are deduplicated, cancellation is honoured at
//! every suspension point, and terminal failures degrade to placeholder
//! records instead of an error.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`decoder`] | Incremental newline-delimited JSON decoder |
//! | [`fallback`] | Degraded placeholder records |
//! | [`metadata`] | Request identifiers |
//! | [`orchestrator`] | Analysis runs and the record stream |
//! | [`stream`] | NDJSON record output |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use stocklens_agent::AnalysisStreamOrchestrator;
//! use stocklens_core::{AnalysisConfig, AnalysisRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! let orchestrator = AnalysisStreamOrchestrator::new(backend, AnalysisConfig::default())?;
//! let request = AnalysisRequest::parse("AAPL")?;
//! let mut records = orchestrator.analyze(request, CancellationToken::new());
//! while let Some(record) = records.next().await {
//!     println!("{}", serde_json::to_string(&record)?);
//! }
//! ```

pub mod decoder;
pub mod fallback;
pub mod metadata;
pub mod orchestrator;
pub mod stream;

pub use decoder::{DecoderStats, StreamingLineDecoder};
pub use fallback::FallbackRecordGenerator;
pub use metadata::RequestId;
pub use orchestrator::{
    AnalysisOutcome, AnalysisStream, AnalysisStreamOrchestrator, ANALYSIS_OPERATION,
    STREAM_INTERRUPTED,
};
pub use stream::{parse_records, NdjsonRecordWriter, RecordParseError, StreamError};
