//! Error types for mediameta
//!
//! Provider lookups never surface errors to callers: transport, status, and
//! payload failures are absorbed at the client boundary and reported as an
//! absent result. The `Error` type therefore covers construction, validation,
//! and record-store plumbing only.

use thiserror::Error;

/// Result type alias for mediameta operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mediameta
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "tmdb_api_key")
        key: Option<String>,
    },

    /// Record store operation failed
    #[error("store error: {0}")]
    Store(String),

    /// Network error while building or driving an HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error for a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}
