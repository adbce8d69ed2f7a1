//! # Analysis Stream Orchestration
//!
//! [`AnalysisStreamOrchestrator::analyze`] opens the backend token stream
//! through the retry executor, decodes it incrementally and hands records to
//! the caller as an [`AnalysisStream`].
//!
//! ## Delivery Rules
//!
//! | Situation | Behaviour |
//! |-----------|-----------|
//! | Token already cancelled | nothing is emitted |
//! | Opening fails terminally | fallback records for every expected kind |
//! | Record decoded | emitted immediately, in arrival order |
//! | `sources` record decoded | merged into the run's citation ledger |
//! | Stream ends | residual line flushed, then one deduplicated `sources` record |
//! | Stream fails mid-way | not retried; fallback records for kinds not yet delivered |
//! | Token cancelled mid-run | nothing further is emitted |
//!
//! A spawned driver task does the work and feeds an unbounded channel; the
//! stream side re-checks the cancellation token on every poll.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{FusedStream, Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use stocklens_core::{
    AnalysisBackend, AnalysisConfig, AnalysisRequest, CircuitBreakerRegistry, RecordKind,
    RetryExecutor, SourceLedger, StreamRecord, ValidationError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::decoder::StreamingLineDecoder;
use crate::fallback::FallbackRecordGenerator;
use crate::metadata::RequestId;

/// Breaker and retry operation name for opening the analysis stream.
pub const ANALYSIS_OPERATION: &str = "analysis";

/// Code reported when an opened stream fails before completing.
pub const STREAM_INTERRUPTED: &str = "stream.interrupted";

/// How an analysis run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// The stream ran to completion.
    Completed {
        records_emitted: usize,
        lines_dropped: u64,
    },
    /// Live analysis failed; placeholders were emitted for missing kinds.
    Degraded {
        reason: String,
        code: String,
        records_emitted: usize,
        lines_dropped: u64,
    },
    Cancelled { records_emitted: usize },
}

impl AnalysisOutcome {
    pub const fn records_emitted(&self) -> usize {
        match self {
            Self::Completed { records_emitted, .. }
            | Self::Degraded { records_emitted, .. }
            | Self::Cancelled { records_emitted } => *records_emitted,
        }
    }

    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Entry point for running analyses against one backend.
///
/// Cloning is cheap; clones share the backend and the circuit breakers.
#[derive(Clone)]
pub struct AnalysisStreamOrchestrator {
    backend: Arc<dyn AnalysisBackend>,
    executor: RetryExecutor,
    config: Arc<AnalysisConfig>,
    fallback: FallbackRecordGenerator,
}

impl AnalysisStreamOrchestrator {
    /// Create an orchestrator with its own breaker registry.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        config: AnalysisConfig,
    ) -> Result<Self, ValidationError> {
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker));
        Self::with_executor(backend, config, RetryExecutor::new(breakers))
    }

    /// Create an orchestrator that shares `executor`'s breakers with other
    /// callers.
    pub fn with_executor(
        backend: Arc<dyn AnalysisBackend>,
        config: AnalysisConfig,
        executor: RetryExecutor,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            backend,
            executor,
            config: Arc::new(config),
            fallback: FallbackRecordGenerator::new(),
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Start one analysis run.
    ///
    /// Each call opens one fresh backend stream. The returned stream is finite
    /// and yields nothing once `cancel` is cancelled.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn analyze(&self, request: AnalysisRequest, cancel: CancellationToken) -> AnalysisStream {
        let request_id = RequestId::new_v4();
        let span = tracing::info_span!(
            "analysis",
            request_id = %request_id,
            symbol = %request.symbol
        );

        let (sender, receiver) = mpsc::unbounded_channel();
        let outcome = Arc::new(Mutex::new(None));

        let run = AnalysisRun {
            backend: Arc::clone(&self.backend),
            executor: self.executor.clone(),
            config: Arc::clone(&self.config),
            fallback: self.fallback,
            request,
            cancel: cancel.clone(),
        };
        let slot = Arc::clone(&outcome);
        let driver = tokio::spawn(
            async move {
                let result = run.drive(&sender).await;
                *slot.lock() = Some(result);
                drop(sender);
            }
            .instrument(span),
        );

        AnalysisStream {
            request_id,
            receiver,
            cancel,
            outcome,
            driver,
            delivered: 0,
            finished: false,
        }
    }
}

struct AnalysisRun {
    backend: Arc<dyn AnalysisBackend>,
    executor: RetryExecutor,
    config: Arc<AnalysisConfig>,
    fallback: FallbackRecordGenerator,
    request: AnalysisRequest,
    cancel: CancellationToken,
}

impl AnalysisRun {
    async fn drive(self, sender: &mpsc::UnboundedSender<StreamRecord>) -> AnalysisOutcome {
        let mut sink = RecordSink::new(sender);
        if self.cancel.is_cancelled() {
            tracing::debug!("cancelled before start");
            return AnalysisOutcome::Cancelled { records_emitted: 0 };
        }

        let backend = self.backend.as_ref();
        let request = &self.request;
        let cancel = &self.cancel;
        let opened = self
            .executor
            .execute(ANALYSIS_OPERATION, &self.config.retry, cancel, || {
                backend.open_stream(request, cancel.clone())
            })
            .await;

        let mut fragments = match opened {
            Ok(fragments) => fragments,
            Err(error) if error.is_cancelled() => {
                tracing::info!(attempts = error.attempts(), "cancelled while opening stream");
                return AnalysisOutcome::Cancelled { records_emitted: 0 };
            }
            Err(error) => {
                tracing::warn!(
                    code = error.code(),
                    attempts = error.attempts(),
                    error = %error,
                    "analysis unavailable, emitting fallback records"
                );
                let reason = error
                    .operation_error()
                    .map_or_else(|| error.to_string(), |cause| cause.message.clone());
                return self.degrade(&mut sink, reason, error.code(), 0);
            }
        };
        tracing::debug!("analysis stream opened");

        let mut decoder = StreamingLineDecoder::new(self.config.max_line_bytes);
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!(records = sink.emitted, "analysis cancelled mid-stream");
                    return AnalysisOutcome::Cancelled { records_emitted: sink.emitted };
                }
                next = fragments.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    for record in decoder.feed(&fragment) {
                        sink.route(record);
                    }
                }
                Some(Err(error)) => {
                    tracing::warn!(
                        error = %error,
                        records = sink.emitted,
                        "stream failed after opening, not retrying"
                    );
                    let dropped = decoder.stats().dropped();
                    return self.degrade(
                        &mut sink,
                        error.message().to_owned(),
                        STREAM_INTERRUPTED,
                        dropped,
                    );
                }
                None => break,
            }
        }

        if let Some(record) = decoder.flush() {
            sink.route(record);
        }
        sink.emit_sources();

        let stats = decoder.stats();
        tracing::info!(
            records = sink.emitted,
            decoded = stats.decoded,
            dropped = stats.dropped(),
            "analysis completed"
        );
        AnalysisOutcome::Completed {
            records_emitted: sink.emitted,
            lines_dropped: stats.dropped(),
        }
    }

    fn degrade(
        &self,
        sink: &mut RecordSink<'_>,
        reason: String,
        code: &str,
        lines_dropped: u64,
    ) -> AnalysisOutcome {
        let placeholders = self
            .fallback
            .generate_missing(&self.request.symbol, &reason, &sink.delivered);
        tracing::debug!(placeholders = placeholders.len(), "emitting fallback records");
        for record in placeholders {
            sink.emit(record);
        }
        sink.emit_sources();

        AnalysisOutcome::Degraded {
            reason,
            code: code.to_owned(),
            records_emitted: sink.emitted,
            lines_dropped,
        }
    }
}

/// Per-run routing of decoded records: citations go to the ledger, everything
/// else straight to the caller.
struct RecordSink<'a> {
    sender: &'a mpsc::UnboundedSender<StreamRecord>,
    sources: SourceLedger,
    delivered: HashSet<RecordKind>,
    emitted: usize,
}

impl<'a> RecordSink<'a> {
    fn new(sender: &'a mpsc::UnboundedSender<StreamRecord>) -> Self {
        Self {
            sender,
            sources: SourceLedger::new(),
            delivered: HashSet::new(),
            emitted: 0,
        }
    }

    fn route(&mut self, record: StreamRecord) {
        match record {
            StreamRecord::Sources(citations) => {
                self.sources.merge(citations);
            }
            other => self.emit(other),
        }
    }

    fn emit(&mut self, record: StreamRecord) {
        let kind = record.kind();
        // A closed channel means the consumer dropped the stream.
        if self.sender.send(record).is_ok() {
            self.delivered.insert(kind);
            self.emitted += 1;
        }
    }

    fn emit_sources(&mut self) {
        if let Some(record) = std::mem::take(&mut self.sources).into_record() {
            self.emit(record);
        }
    }
}

/// Records of one analysis run, in delivery order.
///
/// Dropping the stream stops the run.
pub struct AnalysisStream {
    request_id: RequestId,
    receiver: mpsc::UnboundedReceiver<StreamRecord>,
    cancel: CancellationToken,
    outcome: Arc<Mutex<Option<AnalysisOutcome>>>,
    driver: JoinHandle<()>,
    delivered: usize,
    finished: bool,
}

impl AnalysisStream {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// How the run ended; `None` until the stream has been exhausted.
    pub fn outcome(&self) -> Option<AnalysisOutcome> {
        if !self.finished {
            return None;
        }
        self.outcome.lock().clone()
    }

    fn finish_cancelled(&mut self) {
        self.finished = true;
        self.receiver.close();
        self.driver.abort();
        *self.outcome.lock() = Some(AnalysisOutcome::Cancelled {
            records_emitted: self.delivered,
        });
    }
}

impl Stream for AnalysisStream {
    type Item = StreamRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }
        if this.cancel.is_cancelled() {
            this.finish_cancelled();
            return Poll::Ready(None);
        }

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(record)) => {
                this.delivered += 1;
                Poll::Ready(Some(record))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedStream for AnalysisStream {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

impl Drop for AnalysisStream {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stocklens_core::{
        BackendError, CircuitBreakerConfig, CircuitState, RetryConfig, ReplayBackend,
        SourceCitation,
    };

    use super::*;

    const TRANSCRIPT: &str = concat!(
        r#"{"type":"priceInfo","data":{"symbol":"AAPL","currentPrice":190.1,"currency":"USD","summary":"near highs"}}"#,
        "\n",
        r#"{"type":"sources","data":[{"uri":"https://a.example","title":"A"}]}"#,
        "\n",
        r#"{"type":"technicalAnalysis","data":{"score":7.0,"summary":"uptrend"}}"#,
        "\n",
        "garbage line\n",
        r#"{"type":"sources","data":[{"uri":"https://a.example","title":"A again"},{"uri":"https://b.example","title":"B"}]}"#,
        "\n",
        r#"{"type":"overallJudgement","data":{"decision":"BUY","rationale":"momentum"}}"#,
    );

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            retry: RetryConfig::exponential(3)
                .with_delays(Duration::from_millis(10), Duration::from_millis(100)),
            circuit_breaker: CircuitBreakerConfig::default(),
            ..AnalysisConfig::default()
        }
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::parse("AAPL").unwrap()
    }

    fn orchestrator(backend: Arc<ReplayBackend>) -> AnalysisStreamOrchestrator {
        AnalysisStreamOrchestrator::new(backend, config()).unwrap()
    }

    #[tokio::test]
    async fn emits_records_in_order_with_deduplicated_sources_last() {
        let backend = Arc::new(ReplayBackend::new(TRANSCRIPT).with_chunk_size(7));
        let mut stream = orchestrator(backend).analyze(request(), CancellationToken::new());

        let mut records = Vec::new();
        while let Some(record) = stream.next().await {
            records.push(record);
        }

        let kinds: Vec<_> = records.iter().map(StreamRecord::kind).collect();
        assert_eq!(
            kinds,
            vec![
                RecordKind::PriceInfo,
                RecordKind::TechnicalAnalysis,
                RecordKind::OverallJudgement,
                RecordKind::Sources,
            ]
        );
        assert_eq!(
            records[3],
            StreamRecord::Sources(vec![
                SourceCitation::new("https://a.example", "A"),
                SourceCitation::new("https://b.example", "B"),
            ])
        );
        assert_eq!(
            stream.outcome(),
            Some(AnalysisOutcome::Completed {
                records_emitted: 4,
                lines_dropped: 1,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_open_failures_are_retried_without_fallback() {
        let backend = Arc::new(
            ReplayBackend::new(TRANSCRIPT)
                .with_failed_opens(2, BackendError::new("TIMEOUT")),
        );
        let mut stream =
            orchestrator(Arc::clone(&backend)).analyze(request(), CancellationToken::new());
        let records: Vec<_> = stream.by_ref().collect().await;

        assert_eq!(backend.opens(), 3);
        assert!(records.iter().all(|record| !record.is_degraded()));
        assert!(matches!(stream.outcome(), Some(AnalysisOutcome::Completed { .. })));
    }

    #[tokio::test]
    async fn credential_failure_falls_back_after_one_attempt() {
        let backend = Arc::new(
            ReplayBackend::new(TRANSCRIPT)
                .with_failed_opens(5, BackendError::new("API key not valid").with_status(400)),
        );
        let mut stream =
            orchestrator(Arc::clone(&backend)).analyze(request(), CancellationToken::new());
        let records: Vec<_> = stream.by_ref().collect().await;

        assert_eq!(backend.opens(), 1);
        let kinds: Vec<_> = records.iter().map(StreamRecord::kind).collect();
        assert_eq!(kinds, RecordKind::EXPECTED.to_vec());
        assert!(records.iter().all(StreamRecord::is_degraded));

        let Some(AnalysisOutcome::Degraded { reason, code, .. }) = stream.outcome() else {
            panic!("expected degraded outcome");
        };
        assert_eq!(reason, "API key not valid");
        assert_eq!(code, "retry.non_retryable");
    }

    #[tokio::test]
    async fn mid_stream_failure_only_fills_missing_kinds() {
        let backend = Arc::new(
            ReplayBackend::new(TRANSCRIPT)
                .with_chunk_size(TRANSCRIPT.len() / 2)
                .with_stream_failure(1, BackendError::new("connection reset")),
        );
        let mut stream =
            orchestrator(Arc::clone(&backend)).analyze(request(), CancellationToken::new());
        let records: Vec<_> = stream.by_ref().collect().await;

        assert_eq!(backend.opens(), 1, "mid-stream failures are not retried");
        assert_eq!(records[0].kind(), RecordKind::PriceInfo);
        assert!(!records[0].is_degraded());

        let live_kinds: HashSet<_> = records
            .iter()
            .filter(|record| !record.is_degraded())
            .map(StreamRecord::kind)
            .collect();
        for record in records.iter().filter(|record| record.is_degraded()) {
            assert!(!live_kinds.contains(&record.kind()), "duplicate {:?}", record.kind());
        }

        let expected_total: HashSet<_> = records.iter().map(StreamRecord::kind).collect();
        for kind in RecordKind::EXPECTED {
            assert!(expected_total.contains(&kind), "missing {kind}");
        }
        assert!(matches!(
            stream.outcome(),
            Some(AnalysisOutcome::Degraded { ref code, .. }) if code == STREAM_INTERRUPTED
        ));
    }

    #[tokio::test]
    async fn pre_cancelled_token_yields_nothing() {
        let backend = Arc::new(ReplayBackend::new(TRANSCRIPT));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut stream = orchestrator(Arc::clone(&backend)).analyze(request(), cancel);
        assert!(stream.next().await.is_none());
        assert_eq!(
            stream.outcome(),
            Some(AnalysisOutcome::Cancelled { records_emitted: 0 })
        );
    }

    #[tokio::test]
    async fn nothing_is_emitted_after_cancellation() {
        let backend = Arc::new(ReplayBackend::new(TRANSCRIPT).with_chunk_size(5));
        let cancel = CancellationToken::new();
        let mut stream = orchestrator(backend).analyze(request(), cancel.clone());

        let first = stream.next().await.expect("first record");
        assert_eq!(first.kind(), RecordKind::PriceInfo);

        cancel.cancel();
        assert!(stream.next().await.is_none());
        assert!(stream.is_terminated());
        assert_eq!(
            stream.outcome(),
            Some(AnalysisOutcome::Cancelled { records_emitted: 1 })
        );
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_to_fallback() {
        let backend = Arc::new(ReplayBackend::new(TRANSCRIPT));
        let orchestrator = orchestrator(Arc::clone(&backend));
        let breaker = orchestrator.executor().breakers().breaker(ANALYSIS_OPERATION);
        for _ in 0..orchestrator.config().circuit_breaker.failure_threshold {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let mut stream = orchestrator.analyze(request(), CancellationToken::new());
        let records: Vec<_> = stream.by_ref().collect().await;

        assert_eq!(backend.opens(), 0);
        assert_eq!(records.len(), RecordKind::EXPECTED.len());
        assert!(matches!(
            stream.outcome(),
            Some(AnalysisOutcome::Degraded { ref code, .. }) if code == "retry.circuit_open"
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = config();
        config.max_line_bytes = 0;
        let result = AnalysisStreamOrchestrator::new(Arc::new(ReplayBackend::new("")), config);
        assert!(matches!(result, Err(ValidationError::ZeroLineBound)));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let value =
            serde_json::to_value(AnalysisOutcome::Cancelled { records_emitted: 2 }).unwrap();
        assert_eq!(value, serde_json::json!({"status": "cancelled", "records_emitted": 2}));
    }
}
