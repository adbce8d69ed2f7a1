use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;
use crate::{CoreError, ValidationError};

/// Default upper bound for one undelimited line in the decode buffer.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Tunables for one analysis client.
///
/// Every field has a default, so a partial JSON document (or `{}`) is a valid
/// configuration. Durations are expressed in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub max_line_bytes: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        if self.max_line_bytes == 0 {
            return Err(ValidationError::ZeroLineBound);
        }
        Ok(())
    }

    /// Parse a JSON configuration document and validate it.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
}
