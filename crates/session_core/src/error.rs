use shared::error::RelayError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("not initialized: {0}")]
    NotInitialized(&'static str),
    #[error("user closed the approval modal before the wallet approved the pairing")]
    UserCancelled,
    #[error("malformed session: {0}")]
    MalformedSession(String),
    #[error("wallet returned an unexpected response: {0}")]
    InvalidResponse(String),
    #[error("failed to encode wallet request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("approval modal failure: {0}")]
    Modal(#[source] anyhow::Error),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl From<ConfigError> for AdapterError {
    fn from(value: ConfigError) -> Self {
        AdapterError::Configuration(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
