use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use stocklens_agent::{AnalysisOutcome, AnalysisStreamOrchestrator, NdjsonRecordWriter};
use stocklens_core::{AnalysisConfig, AnalysisRequest, BackendError, ReplayBackend};
use tokio_util::sync::CancellationToken;

use crate::cli::AnalyzeArgs;
use crate::error::CliError;

pub async fn run(args: &AnalyzeArgs, config: AnalysisConfig) -> Result<AnalysisOutcome, CliError> {
    let request = build_request(args)?;
    let transcript = fs::read_to_string(&args.transcript).map_err(|source| CliError::ReadFile {
        path: args.transcript.clone(),
        source,
    })?;
    let backend = build_backend(args, transcript);
    let orchestrator = AnalysisStreamOrchestrator::new(Arc::new(backend), config)?;

    let cancel = CancellationToken::new();
    if let Some(ms) = args.deadline_ms {
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            tracing::info!(deadline_ms = ms, "deadline reached, cancelling analysis");
            deadline.cancel();
        });
    }
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    stream_records(&orchestrator, request, cancel, std::io::stdout()).await
}

fn build_request(args: &AnalyzeArgs) -> Result<AnalysisRequest, CliError> {
    let request = AnalysisRequest::parse(&args.symbol)?.with_locale(args.locale.as_str());
    match &args.question {
        Some(question) => Ok(request.with_question(question.as_str())?),
        None => Ok(request),
    }
}

fn build_backend(args: &AnalyzeArgs, transcript: String) -> ReplayBackend {
    let mut backend = ReplayBackend::new(transcript).with_chunk_size(args.chunk_size);

    if args.fail_opens > 0 {
        let mut error = BackendError::new(args.fail_message.as_str());
        if let Some(status) = args.fail_status {
            error = error.with_status(status);
        }
        backend = backend.with_failed_opens(args.fail_opens, error);
    }
    if let Some(fragments) = args.fail_after_fragments {
        backend = backend.with_stream_failure(
            fragments,
            BackendError::new("replayed stream interrupted"),
        );
    }
    backend
}

/// Write every record of one run to `writer` and report how the run ended.
async fn stream_records<W: Write>(
    orchestrator: &AnalysisStreamOrchestrator,
    request: AnalysisRequest,
    cancel: CancellationToken,
    writer: W,
) -> Result<AnalysisOutcome, CliError> {
    let mut records = orchestrator.analyze(request, cancel);
    let mut writer = NdjsonRecordWriter::new(writer);

    while let Some(record) = records.next().await {
        writer.write_record(&record)?;
    }

    let outcome = records
        .outcome()
        .ok_or_else(|| CliError::Command(String::from("analysis ended without an outcome")))?;
    tracing::info!(
        request_id = %records.request_id(),
        records = writer.records_written(),
        outcome = ?outcome,
        "analysis finished"
    );
    Ok(outcome)
}
