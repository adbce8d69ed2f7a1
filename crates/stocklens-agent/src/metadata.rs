//! # Run Identification
//!
//! Every analysis run gets a [`RequestId`] (UUID v4). It is attached to the
//! run's `analysis` tracing span and reported with the outcome, so logs from
//! the retry executor, the decoder and the fallback path can be correlated.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use stocklens_core::ValidationError;
use uuid::Uuid;

/// Request identifier (UUID v4) for one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a caller-supplied request ID, e.g. one propagated from an
    /// upstream service.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let uuid = Uuid::parse_str(input).map_err(|_| ValidationError::InvalidRequestId)?;
        Ok(Self(uuid))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new_v4()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_uuid_v4() {
        assert_eq!(RequestId::new_v4().as_uuid().get_version_num(), 4);
    }

    #[test]
    fn request_id_round_trips_through_display() {
        let parsed = RequestId::parse("123e4567-e89b-42d3-a456-426614174000").unwrap();
        assert_eq!(parsed.to_string(), "123e4567-e89b-42d3-a456-426614174000");
    }

    #[test]
    fn request_id_rejects_invalid_uuid() {
        assert_eq!(
            RequestId::parse("not-a-uuid"),
            Err(ValidationError::InvalidRequestId)
        );
    }
}
