use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayErrorCode {
    Unavailable,
    NoMatchingKey,
    Expired,
    Rejected,
    Unsupported,
    Internal,
}

/// Failure reported by the relay transport or the remote wallet.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct RelayError {
    pub code: RelayErrorCode,
    pub message: String,
}

impl RelayError {
    pub fn new(code: RelayErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RelayErrorCode::Unavailable, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(RelayErrorCode::Rejected, message)
    }
}
