//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type StateResult<T> = Result<T, StateError>;

/// Domain-level error.
///
/// Only construction and (de)serialization of a `RequestState` can fail.
/// Per-identifier problems (unknown ids, duplicate deliveries) are absorbed
/// into the state's bookkeeping and logged instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// A tunable or input failed validation (e.g. zero batch size).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier (job id or lookup identifier) could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A persisted timestamp did not match the fixed wire format.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A persisted document could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl StateError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_identifier(msg: impl Into<String>) -> Self {
        Self::InvalidIdentifier(msg.into())
    }

    pub fn invalid_timestamp(msg: impl Into<String>) -> Self {
        Self::InvalidTimestamp(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
