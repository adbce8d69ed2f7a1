//! Retry policy: exponential backoff with jitter and retryability classification.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BackendError, ValidationError};

/// Substrings that mark a backend failure as transient.
const BUILTIN_RETRYABLE_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "resource_exhausted",
    "resource exhausted",
    "too many requests",
    "internal",
    "timeout",
    "timed out",
    "deadline",
    "network",
    "connection reset",
    "econnreset",
    "unavailable",
    "overloaded",
    "429",
    "500",
    "502",
    "503",
    "504",
];

/// Substrings that mark a credential problem. These are never retried, even
/// when a configured pattern also matches.
const CREDENTIAL_PATTERNS: &[&str] = &[
    "api key not valid",
    "api_key_invalid",
    "invalid api key",
    "invalid_api_key",
    "unauthenticated",
    "unauthorized",
    "permission_denied",
    "permission denied",
    "invalid credential",
];

/// Fraction of the exponential delay used as the upper bound of the jitter.
const JITTER_RATIO: f64 = 0.1;

/// Configuration for retrying the operation that opens the analysis stream.
///
/// Total attempts = `max_retries + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Extra case-insensitive substrings that make an error retryable, on top
    /// of the built-in set.
    pub retryable_error_patterns: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            retryable_error_patterns: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Default backoff with a custom retry budget.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.retryable_error_patterns.push(pattern.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(ValidationError::InvalidBackoffMultiplier {
                value: self.backoff_multiplier.to_string(),
            });
        }
        if self.base_delay > self.max_delay {
            return Err(ValidationError::BaseDelayExceedsMax {
                base_ms: self.base_delay.as_millis(),
                max_ms: self.max_delay.as_millis(),
            });
        }
        Ok(())
    }

    /// Calculate the delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        compute_delay(attempt, self)
    }
}

/// Backoff delay before retry `attempt` (0-based).
///
/// `min(base * multiplier^attempt + jitter, max_delay)` where jitter is drawn
/// uniformly from `[0, 0.1 * base * multiplier^attempt]`.
pub fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    delay_with_jitter(attempt, config, fastrand::f64())
}

/// Deterministic core of [`compute_delay`]; `jitter_unit` is in `[0, 1]`.
pub(crate) fn delay_with_jitter(attempt: u32, config: &RetryConfig, jitter_unit: f64) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let exponential = config.base_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let jitter = exponential * JITTER_RATIO * jitter_unit.clamp(0.0, 1.0);
    let max_seconds = config.max_delay.as_secs_f64();

    let seconds = exponential + jitter;
    if !seconds.is_finite() || seconds >= max_seconds {
        return config.max_delay;
    }
    Duration::from_secs_f64(seconds.max(0.0))
}

/// Whether a backend failure is worth another attempt.
///
/// Credential failures are never retryable. Everything else is retryable when
/// its message, code or status contains a built-in or configured pattern.
pub fn is_retryable(error: &BackendError, config: &RetryConfig) -> bool {
    let haystack = error_haystack(error);

    if matches!(error.status(), Some(401 | 403))
        || CREDENTIAL_PATTERNS.iter().any(|p| haystack.contains(p))
    {
        return false;
    }

    BUILTIN_RETRYABLE_PATTERNS
        .iter()
        .any(|pattern| haystack.contains(pattern))
        || config
            .retryable_error_patterns
            .iter()
            .map(|pattern| pattern.trim().to_lowercase())
            .any(|pattern| !pattern.is_empty() && haystack.contains(&pattern))
}

fn error_haystack(error: &BackendError) -> String {
    let mut haystack = error.message().to_lowercase();
    if let Some(code) = error.code() {
        haystack.push(' ');
        haystack.push_str(&code.to_lowercase());
    }
    if let Some(status) = error.status() {
        haystack.push(' ');
        haystack.push_str(&status.to_string());
    }
    haystack
}

/// A backend failure after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    pub message: String,
    pub retryable: bool,
    pub cause_code: Option<String>,
}

impl OperationError {
    pub fn classify(error: &BackendError, config: &RetryConfig) -> Self {
        Self {
            message: error.message().to_owned(),
            retryable: is_retryable(error, config),
            cause_code: error
                .code()
                .map(str::to_owned)
                .or_else(|| error.status().map(|status| status.to_string())),
        }
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause_code {
            Some(code) => write!(f, "{} [{}]", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for OperationError {}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
