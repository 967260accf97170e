//! Error types for the catalog reconciler

use thiserror::Error;

/// Result type for catalog sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Error type for catalog sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Port label {label:?} not found in any network")]
    PortLabelNotFound { label: String },

    #[error("Invalid port label {label:?}: {reason}")]
    InvalidPortLabel { label: String, reason: String },

    #[error("Address mode \"driver\" requires a driver network")]
    MissingDriverNetwork,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Catalog(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::Validation(err.to_string())
    }
}
