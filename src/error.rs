//! Error types for the MeloSync core
//!
//! This module defines error types using thiserror for ergonomic error
//! handling. Errors are categorized by domain (network, storage, quota,
//! metadata) so callers can decide between retrying, asking the user for
//! action, or degrading gracefully.

use thiserror::Error;

/// Result type alias using our CoreError type
pub type Result<T> = std::result::Result<T, CoreError>;

/// Main error type for the MeloSync core
#[derive(Error, Debug)]
pub enum CoreError {
    // ===== Network =====

    /// Network connectivity or transfer error. Transient errors (timeouts,
    /// dropped connections) are retryable by the caller.
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Whether this error might succeed on retry
        is_transient: bool,
    },

    /// Server responded with an unexpected status code
    #[error("Server responded with unexpected status code: {status_code}")]
    UnexpectedStatusCode {
        status_code: u16,
        url: String,
    },

    /// Provider quota is exhausted; retry after the given number of seconds
    #[error("Rate limit exhausted for provider '{provider}'. Retry after {retry_after_seconds} seconds")]
    QuotaExceeded {
        provider: String,
        retry_after_seconds: u64,
    },

    // ===== Storage =====

    /// No write access to the requested destination; requires user action
    /// (e.g. re-granting the storage permission)
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Destination unusable: disk full, invalid path, delegate refused the file
    #[error("Storage error: {0}")]
    Storage(String),

    /// File or directory not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    // ===== Metadata =====

    /// Tag parsing failed; display degrades to unknown fields, never fatal
    #[error("Metadata read failed: {0}")]
    MetadataRead(String),

    // ===== General =====

    /// Operation was cancelled by user or system
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Application state is invalid for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper methods for creating common errors
impl CoreError {
    /// Create a Network error with a message
    pub fn network<S: Into<String>>(message: S, is_transient: bool) -> Self {
        CoreError::Network {
            message: message.into(),
            is_transient,
        }
    }

    /// Create a Storage error with a message
    pub fn storage<S: Into<String>>(message: S) -> Self {
        CoreError::Storage(message.into())
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        CoreError::InvalidInput(message.into())
    }

    /// Check if the error is retryable without user action
    ///
    /// Returns `true` for transient network failures and timeouts. Quota
    /// errors carry their own retry-after window and are not retryable
    /// immediately; permission and storage errors need user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Network { is_transient, .. } => *is_transient,
            CoreError::Reqwest(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
