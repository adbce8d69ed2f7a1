//! Behavior-driven tests for analysis runs
//!
//! These tests verify WHAT a caller observes while consuming an analysis:
//! ordering, citation deduplication, cancellation and partial failures.

use std::collections::HashSet;
use std::time::Duration;

use futures::StreamExt;
use stocklens_core::BackendError;
use stocklens_tests::*;
use tokio_util::sync::CancellationToken;

fn orchestrator(backend: Arc<ScriptedBackend>) -> AnalysisStreamOrchestrator {
    AnalysisStreamOrchestrator::new(backend, fast_config(2, 5)).expect("valid config")
}

// =============================================================================
// Ordering and citations
// =============================================================================

#[tokio::test]
async fn user_receives_records_in_arrival_order_with_one_deduplicated_source_list() {
    // Given: A backend streaming a full analysis in small fragments
    let backend = Arc::new(ScriptedBackend::new([OpenScript::fragments(FULL_TRANSCRIPT, 11)]));

    // When: The user consumes the analysis
    let mut stream = orchestrator(backend).analyze(request("AAPL"), CancellationToken::new());
    let records: Vec<_> = stream.by_ref().collect().await;

    // Then: Analysis records arrive in order with the citations last
    assert_eq!(
        kinds(&records),
        vec![
            RecordKind::PriceInfo,
            RecordKind::TechnicalAnalysis,
            RecordKind::FundamentalAnalysis,
            RecordKind::OverallJudgement,
            RecordKind::Sources,
        ]
    );

    // And: Citations are unique by uri with the first title kept
    assert_eq!(
        records[4],
        StreamRecord::Sources(vec![
            SourceCitation::new("https://news.example/1", "Earnings beat"),
            SourceCitation::new("https://filings.example/10q", "10-Q"),
        ])
    );
    assert_eq!(
        stream.outcome(),
        Some(AnalysisOutcome::Completed {
            records_emitted: 5,
            lines_dropped: 0,
        })
    );
}

#[tokio::test]
async fn user_receives_no_source_record_when_backend_cites_nothing() {
    let backend = Arc::new(ScriptedBackend::new([OpenScript::fragments(
        "{\"type\":\"freeformAnswer\",\"data\":\"No view.\"}\n",
        4,
    )]));

    let records: Vec<_> = orchestrator(backend)
        .analyze(request("AAPL"), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(kinds(&records), vec![RecordKind::FreeformAnswer]);
}

#[tokio::test]
async fn each_run_opens_a_fresh_stream() {
    let backend = Arc::new(ScriptedBackend::new([
        OpenScript::fragments(FULL_TRANSCRIPT, 64),
        OpenScript::fragments(FULL_TRANSCRIPT, 7),
    ]));
    let orchestrator = orchestrator(backend.clone());

    let first: Vec<_> = orchestrator
        .analyze(request("AAPL"), CancellationToken::new())
        .collect()
        .await;
    let second: Vec<_> = orchestrator
        .analyze(request("AAPL"), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(backend.opens(), 2);
    assert_eq!(first, second);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_user_cancels_mid_stream_then_no_further_record_arrives() {
    // Given: A slow backend delivering one line per fragment
    let lines: Vec<&str> = FULL_TRANSCRIPT.split_inclusive('\n').collect();
    let backend = Arc::new(
        ScriptedBackend::new([OpenScript::Stream(
            lines.iter().map(|line| Ok(line.to_string())).collect(),
        )])
        .with_fragment_delay(Duration::from_millis(100)),
    );
    let cancel = CancellationToken::new();
    let mut stream = orchestrator(backend).analyze(request("AAPL"), cancel.clone());

    // When: The user cancels after the first record
    let first = stream.next().await.expect("first record");
    assert_eq!(first.kind(), RecordKind::PriceInfo);
    cancel.cancel();

    // Then: The stream ends and nothing else is delivered
    assert_eq!(stream.next().await, None);
    assert_eq!(stream.next().await, None);
    assert_eq!(
        stream.outcome(),
        Some(AnalysisOutcome::Cancelled { records_emitted: 1 })
    );
}

#[tokio::test(start_paused = true)]
async fn when_deadline_fires_on_a_silent_stream_then_run_ends_cancelled() {
    // Given: A backend that opens but never produces a fragment
    let backend = Arc::new(ScriptedBackend::new([OpenScript::Hang]));
    let cancel = CancellationToken::new();
    let deadline = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        deadline.cancel();
    });

    // When: The user waits for records
    let mut stream = orchestrator(backend).analyze(request("AAPL"), cancel);
    let records: Vec<_> = stream.by_ref().collect().await;

    // Then: The run ends at the deadline without any record or fallback
    assert!(records.is_empty());
    assert_eq!(
        stream.outcome(),
        Some(AnalysisOutcome::Cancelled { records_emitted: 0 })
    );
}

#[tokio::test(start_paused = true)]
async fn when_cancelled_during_backoff_then_no_fallback_is_emitted() {
    // Given: A backend that keeps timing out
    let backend = Arc::new(ScriptedBackend::new([
        OpenScript::Fail(BackendError::new("deadline exceeded")),
        OpenScript::Fail(BackendError::new("deadline exceeded")),
        OpenScript::Fail(BackendError::new("deadline exceeded")),
    ]));
    let config = AnalysisConfig {
        retry: RetryConfig::exponential(2)
            .with_delays(Duration::from_secs(10), Duration::from_secs(60)),
        ..fast_config(2, 5)
    };
    let orchestrator =
        AnalysisStreamOrchestrator::new(backend.clone(), config).expect("valid config");
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    // When: The user cancels while the client waits to retry
    let records: Vec<_> = orchestrator.analyze(request("AAPL"), cancel).collect().await;

    // Then: Only the first attempt was made and nothing was emitted
    assert_eq!(backend.opens(), 1);
    assert!(records.is_empty());
}

// =============================================================================
// Mid-stream failure
// =============================================================================

#[tokio::test]
async fn when_stream_breaks_mid_way_then_delivered_records_stand_and_gaps_are_filled() {
    // Given: A stream that fails after price and technical records
    let lines: Vec<&str> = FULL_TRANSCRIPT.split_inclusive('\n').collect();
    let mut fragments: Vec<Result<String, BackendError>> =
        lines[..3].iter().map(|line| Ok(line.to_string())).collect();
    fragments.push(Err(BackendError::new("connection reset by peer")));
    let backend = Arc::new(ScriptedBackend::new([
        OpenScript::Stream(fragments),
        OpenScript::fragments(FULL_TRANSCRIPT, 8),
    ]));

    // When: The user consumes the analysis
    let mut stream =
        orchestrator(backend.clone()).analyze(request("AAPL"), CancellationToken::new());
    let records: Vec<_> = stream.by_ref().collect().await;

    // Then: The broken stream is not replayed
    assert_eq!(backend.opens(), 1);

    // And: Live records come first, then placeholders for what is missing,
    // then the citations gathered before the failure
    assert_eq!(
        kinds(&records),
        vec![
            RecordKind::PriceInfo,
            RecordKind::TechnicalAnalysis,
            RecordKind::FundamentalAnalysis,
            RecordKind::OverallJudgement,
            RecordKind::Sources,
        ]
    );
    assert!(!records[0].is_degraded());
    assert!(!records[1].is_degraded());
    assert!(records[2].is_degraded());
    assert!(records[3].is_degraded());

    // And: No kind is delivered twice
    let unique: HashSet<_> = kinds(&records).into_iter().collect();
    assert_eq!(unique.len(), records.len());

    let Some(AnalysisOutcome::Degraded { reason, code, records_emitted, .. }) = stream.outcome()
    else {
        panic!("expected degraded outcome");
    };
    assert_eq!(reason, "connection reset by peer");
    assert_eq!(code, stocklens_agent::STREAM_INTERRUPTED);
    assert_eq!(records_emitted, 5);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_do_not_share_decoders_or_citations() {
    // Given: Eight runs against independent backends sharing one executor
    let executor = stocklens_core::RetryExecutor::default();
    let mut handles = Vec::new();

    for index in 0..8 {
        let transcript = format!(
            "{{\"type\":\"freeformAnswer\",\"data\":\"run {index}\"}}\n{{\"type\":\"sources\",\"data\":[{{\"uri\":\"https://run.example/{index}\",\"title\":\"R{index}\"}}]}}\n"
        );
        let backend = Arc::new(ScriptedBackend::new([OpenScript::fragments(&transcript, 3)]));
        let orchestrator = AnalysisStreamOrchestrator::with_executor(
            backend,
            fast_config(0, 5),
            executor.clone(),
        )
        .expect("valid config");

        handles.push(tokio::spawn(async move {
            let records: Vec<_> = orchestrator
                .analyze(request("AAPL"), CancellationToken::new())
                .collect()
                .await;
            (index, records)
        }));
    }

    // When/Then: Every run sees exactly its own answer and citation
    for handle in handles {
        let (index, records) = handle.await.expect("run completes");
        assert_eq!(
            records,
            vec![
                StreamRecord::FreeformAnswer(format!("run {index}")),
                StreamRecord::Sources(vec![SourceCitation::new(
                    format!("https://run.example/{index}"),
                    format!("R{index}"),
                )]),
            ]
        );
    }
}
