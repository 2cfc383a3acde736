//! Outbox error types.

use thiserror::Error;

/// Outbox error type.
///
/// Only configuration errors are returned from queue operations; storage and
/// transport failures are absorbed by the drain engine and surface in logs.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Missing or malformed setup (e.g. no collector URL)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(#[from] outbox_storage::StorageError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport-level failure that is not an HTTP status
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
