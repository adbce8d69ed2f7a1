//! Retry executor: retry policy plus circuit breaker around one fallible operation.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
use crate::retry::{compute_delay, OperationError, RetryConfig};
use crate::BackendError;

/// Terminal outcome of [`RetryExecutor::execute`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// The breaker rejected the call. `attempts` is non-zero only when this
    /// call's own failures tripped it.
    #[error("circuit breaker for '{operation}' is open; backend is considered unhealthy")]
    CircuitOpen { operation: String, attempts: u32 },

    /// The last attempt failed and no further attempt is permitted.
    #[error("operation '{operation}' failed after {attempts} attempt(s): {error}")]
    Operation {
        operation: String,
        attempts: u32,
        error: OperationError,
    },

    #[error("operation '{operation}' cancelled after {attempts} attempt(s)")]
    Cancelled { operation: String, attempts: u32 },
}

impl RetryError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "retry.circuit_open",
            Self::Operation { error, .. } if error.retryable => "retry.exhausted",
            Self::Operation { .. } => "retry.non_retryable",
            Self::Cancelled { .. } => "retry.cancelled",
        }
    }

    /// Number of times the operation was actually invoked.
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::CircuitOpen { attempts, .. }
            | Self::Operation { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Classified cause, when the operation itself failed.
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            Self::Operation { error, .. } => Some(error),
            Self::CircuitOpen { .. } | Self::Cancelled { .. } => None,
        }
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Runs an operation under the retry policy and the breaker for its name.
///
/// Cloning is cheap; clones share the breaker registry.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    breakers: Arc<CircuitBreakerRegistry>,
}

impl RetryExecutor {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { breakers }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Invoke `operation` until it succeeds or a terminal decision is reached.
    ///
    /// Terminal decisions are: the breaker for `operation_name` rejects the
    /// call (including one tripped by this call's own failures), the failure
    /// is not retryable, or `config.max_retries + 1` attempts have been made. Cancellation is
    /// observed while an attempt is in flight and during backoff sleeps.
    pub async fn execute<T, F, Fut>(
        &self,
        operation_name: &str,
        config: &RetryConfig,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let breaker = self.breakers.breaker(operation_name);
        let max_attempts = config.max_retries.saturating_add(1);
        let mut attempts = 0_u32;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled {
                    operation: operation_name.to_owned(),
                    attempts,
                });
            }

            if !breaker.allow_request() {
                tracing::warn!(operation = operation_name, attempts, "circuit open, failing fast");
                return Err(RetryError::CircuitOpen {
                    operation: operation_name.to_owned(),
                    attempts,
                });
            }

            attempts += 1;
            let admission = Admission::new(&breaker);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled {
                        operation: operation_name.to_owned(),
                        attempts,
                    });
                }
                result = operation() => result,
            };

            let raw = match result {
                Ok(value) => {
                    admission.succeed();
                    if attempts > 1 {
                        tracing::info!(operation = operation_name, attempts, "operation recovered");
                    }
                    return Ok(value);
                }
                Err(raw) => raw,
            };

            let error = OperationError::classify(&raw, config);
            admission.fail();

            if !error.retryable || attempts >= max_attempts {
                tracing::warn!(
                    operation = operation_name,
                    attempts,
                    retryable = error.retryable,
                    error = %error,
                    "operation failed terminally"
                );
                return Err(RetryError::Operation {
                    operation: operation_name.to_owned(),
                    attempts,
                    error,
                });
            }

            if breaker.state() == CircuitState::Open {
                tracing::warn!(
                    operation = operation_name,
                    attempts,
                    error = %error,
                    "circuit opened by this call, abandoning retries"
                );
                return Err(RetryError::CircuitOpen {
                    operation: operation_name.to_owned(),
                    attempts,
                });
            }

            let delay = compute_delay(attempts - 1, config);
            tracing::info!(
                operation = operation_name,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after transient failure"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled {
                        operation: operation_name.to_owned(),
                        attempts,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// One admitted call. Dropped without an outcome (cancelled, or the
/// surrounding future was dropped mid-call), it hands the admission back so a
/// half-open breaker can admit the next trial.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl<'a> Admission<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            settled: false,
        }
    }

    fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release();
        }
    }
}
