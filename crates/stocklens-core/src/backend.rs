//! Contract for the generative backend that produces the analysis token stream.
//!
//! The backend is an external collaborator: this crate only defines how a
//! stream is opened ([`AnalysisBackend`]) and what a raw failure looks like
//! ([`BackendError`]). Transport, model and authentication live behind the
//! trait.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};

use futures::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::AnalysisRequest;

/// Text fragments as they arrive from the backend. Fragment boundaries carry no
/// meaning; a fragment may hold part of a line or several lines.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Future returned by [`AnalysisBackend::open_stream`].
pub type OpenStreamFuture<'a> =
    Pin<Box<dyn Future<Output = Result<FragmentStream, BackendError>> + Send + 'a>>;

/// Raw failure reported by the backend or its transport, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    message: String,
    status: Option<u16>,
    code: Option<String>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)?;
        match (self.status, self.code.as_deref()) {
            (Some(status), Some(code)) => write!(f, " (status {status}, {code})"),
            (Some(status), None) => write!(f, " (status {status})"),
            (None, Some(code)) => write!(f, " ({code})"),
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for BackendError {}

/// Capability to open one cancellable token stream for a request.
///
/// Implementations should stop producing fragments once `cancel` fires; the
/// orchestrator stops consuming on its own either way.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one backend serves concurrent
/// analysis runs.
pub trait AnalysisBackend: Send + Sync {
    fn open_stream<'a>(
        &'a self,
        request: &'a AnalysisRequest,
        cancel: CancellationToken,
    ) -> OpenStreamFuture<'a>;
}

/// Deterministic backend that replays a recorded transcript.
///
/// Used by the CLI to drive an analysis from a captured NDJSON response, and by
/// tests. The transcript is cut into fragments of `chunk_size` bytes (never
/// splitting a UTF-8 character), the first `failed_opens` open attempts fail
/// with the configured error, and an optional error can be injected after a
/// number of fragments.
#[derive(Debug)]
pub struct ReplayBackend {
    transcript: String,
    chunk_size: usize,
    failed_opens: AtomicU32,
    open_failure: BackendError,
    stream_failure: Option<(usize, BackendError)>,
    opens: AtomicU32,
}

impl ReplayBackend {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            chunk_size: 64,
            failed_opens: AtomicU32::new(0),
            open_failure: BackendError::new("replay backend unavailable").with_status(503),
            stream_failure: None,
            opens: AtomicU32::new(0),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Fail the next `count` open attempts with `error`.
    pub fn with_failed_opens(mut self, count: u32, error: BackendError) -> Self {
        self.failed_opens = AtomicU32::new(count);
        self.open_failure = error;
        self
    }

    /// Yield `error` after `fragments` fragments have been delivered.
    pub fn with_stream_failure(mut self, fragments: usize, error: BackendError) -> Self {
        self.stream_failure = Some((fragments, error));
        self
    }

    /// Number of times `open_stream` has been invoked.
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    fn fragments(&self) -> Vec<Result<String, BackendError>> {
        let mut fragments: Vec<Result<String, BackendError>> =
            split_fragments(&self.transcript, self.chunk_size)
                .into_iter()
                .map(Ok)
                .collect();

        if let Some((after, error)) = &self.stream_failure {
            fragments.truncate(*after);
            fragments.push(Err(error.clone()));
        }
        fragments
    }
}

impl AnalysisBackend for ReplayBackend {
    fn open_stream<'a>(
        &'a self,
        request: &'a AnalysisRequest,
        cancel: CancellationToken,
    ) -> OpenStreamFuture<'a> {
        Box::pin(async move {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(symbol = %request.symbol, "replay backend opening stream");

            let should_fail = self
                .failed_opens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(self.open_failure.clone());
            }

            let fragments: FragmentStream = stream::iter(self.fragments())
                .take_until(cancel.cancelled_owned())
                .boxed();
            Ok(fragments)
        })
    }
}

/// Cut `text` into pieces of at most `chunk_size` bytes on character boundaries.
pub fn split_fragments(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut fragments = Vec::with_capacity(text.len() / chunk_size + 1);
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        fragments.push(text[start..end].to_owned());
        start = end;
    }

    fragments
}
