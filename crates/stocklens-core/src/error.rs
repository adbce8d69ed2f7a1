use thiserror::Error;

/// Validation and contract errors exposed by `stocklens-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter or digit: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("question must not be blank when provided")]
    EmptyQuestion,

    #[error("backoff multiplier must be finite and greater than 1, got {value}")]
    InvalidBackoffMultiplier { value: String },
    #[error("base delay ({base_ms}ms) must not exceed max delay ({max_ms}ms)")]
    BaseDelayExceedsMax { base_ms: u128, max_ms: u128 },
    #[error("circuit breaker failure threshold must be greater than zero")]
    ZeroFailureThreshold,
    #[error("max line bytes must be greater than zero")]
    ZeroLineBound,

    #[error("request_id must be a valid UUID")]
    InvalidRequestId,
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_are_actionable() {
        let err = ValidationError::BaseDelayExceedsMax {
            base_ms: 5_000,
            max_ms: 1_000,
        };
        assert_eq!(
            err.to_string(),
            "base delay (5000ms) must not exceed max delay (1000ms)"
        );
    }

    #[test]
    fn core_error_wraps_validation_transparently() {
        let err = CoreError::from(ValidationError::EmptySymbol);
        assert_eq!(err.to_string(), "symbol cannot be empty");
    }
}
