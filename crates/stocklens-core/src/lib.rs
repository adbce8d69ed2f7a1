//! # Stocklens Core
//!
//! Core contracts for the stocklens streaming analysis client.
//!
//! ## Overview
//!
//! This crate holds everything that does not depend on how the token stream is
//! decoded:
//!
//! - **Analysis records** exchanged with callers, and the citation ledger
//! - **Backend contract** for opening a cancellable token stream
//! - **Retry policy** with exponential backoff, jitter and error classification
//! - **Circuit breaker** registry keyed by operation name
//! - **Retry executor** combining both around a fallible async operation
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backend`] | Backend trait, raw backend errors, replay backend |
//! | [`circuit_breaker`] | Circuit breaker and registry |
//! | [`config`] | Client configuration |
//! | [`domain`] | Symbol and analysis request |
//! | [`error`] | Core error types |
//! | [`executor`] | Retry executor |
//! | [`records`] | Stream records and source citations |
//! | [`retry`] | Retry policy |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stocklens_core::{BackendError, CircuitBreakerRegistry, RetryConfig, RetryExecutor};
//! use tokio_util::sync::CancellationToken;
//!
//! let executor = RetryExecutor::new(Arc::new(CircuitBreakerRegistry::default()));
//! let value = executor
//!     .execute("analysis", &RetryConfig::default(), &CancellationToken::new(), || async {
//!         Ok::<_, BackendError>(42)
//!     })
//!     .await?;
//! ```

pub mod backend;
pub mod circuit_breaker;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod records;
pub mod retry;

pub use backend::{
    split_fragments, AnalysisBackend, BackendError, FragmentStream, OpenStreamFuture,
    ReplayBackend,
};
pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
pub use config::{AnalysisConfig, DEFAULT_MAX_LINE_BYTES};
pub use domain::{AnalysisRequest, Symbol};
pub use error::{CoreError, ValidationError};
pub use executor::{RetryError, RetryExecutor};
pub use records::{
    Decision, OverallJudgement, PriceInfo, RecordKind, ScoredSummary, SourceCitation,
    SourceLedger, StreamRecord,
};
pub use retry::{compute_delay, is_retryable, OperationError, RetryConfig};
