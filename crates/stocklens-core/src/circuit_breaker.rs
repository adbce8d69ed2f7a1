use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::retry::duration_ms;
use crate::ValidationError;

/// Runtime circuit state for one operation name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before allowing a trial.
    #[serde(rename = "reset_timeout_ms", with = "duration_ms")]
    pub reset_timeout: Duration,
    /// Failures further apart than this do not accumulate while closed.
    #[serde(rename = "monitoring_period_ms", with = "duration_ms")]
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(120),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::ZeroFailureThreshold);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    last_failure_wall: Option<OffsetDateTime>,
    trial_in_flight: bool,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            last_failure_wall: None,
            trial_in_flight: false,
        }
    }
}

/// Point-in-time view of one breaker, for inspection and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub operation: String,
    pub state: CircuitState,
    pub failure_count: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failure_at: Option<OffsetDateTime>,
}

/// Thread-safe circuit breaker guarding one class of backend calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    operation: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(operation: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            operation: operation.into(),
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Decide whether a call may proceed.
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open and
    /// admits exactly one trial; further callers are rejected until the trial
    /// reports back.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
            CircuitState::Open => {
                let can_probe = inner
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);

                if can_probe {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!(
                        operation = %self.operation,
                        "circuit half-open, admitting trial call"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(operation = %self.operation, "circuit closed after successful trial");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let stale = inner
            .last_failure_at
            .is_some_and(|at| now.duration_since(at) > self.config.monitoring_period);
        if inner.state == CircuitState::Closed && stale {
            inner.failure_count = 0;
        }

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(now);
        inner.last_failure_wall = Some(OffsetDateTime::now_utc());
        inner.trial_in_flight = false;

        let trips = inner.state == CircuitState::HalfOpen
            || inner.failure_count >= self.config.failure_threshold;
        if trips && inner.state != CircuitState::Open {
            tracing::warn!(
                operation = %self.operation,
                failures = inner.failure_count,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "circuit opened"
            );
        }
        if trips {
            inner.state = CircuitState::Open;
        }
    }

    /// Give back an admission without reporting an outcome, e.g. when the
    /// caller was cancelled mid-call. A half-open circuit stays half-open and
    /// admits the next trial.
    pub fn release(&self) {
        self.inner.lock().trial_in_flight = false;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn reset(&self) {
        *self.inner.lock() = CircuitInner::default();
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            operation: self.operation.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_wall,
        }
    }
}

/// Registry of circuit breakers keyed by operation name.
///
/// Breakers are created lazily on first use and live as long as the registry.
/// The map lock is only held to look up or insert; each breaker serializes its
/// own state transitions.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    pub fn breaker(&self, operation: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(operation.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(operation, self.config)))
            .clone()
    }

    /// State of `operation`; unknown operations are closed.
    pub fn state(&self, operation: &str) -> CircuitState {
        let breaker = self.breakers.lock().get(operation).cloned();
        breaker.map_or(CircuitState::Closed, |breaker| breaker.state())
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<_> = self.breakers.lock().values().cloned().collect();
        let mut snapshots: Vec<_> = breakers.iter().map(|breaker| breaker.snapshot()).collect();
        snapshots.sort_by(|left, right| left.operation.cmp(&right.operation));
        snapshots
    }

    pub fn reset(&self, operation: &str) {
        if let Some(breaker) = self.breakers.lock().get(operation) {
            breaker.reset();
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.lock().values() {
            breaker.reset();
        }
    }
}
