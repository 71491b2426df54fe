//! Error types for merge-rewards.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the registration pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Contribution store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Ledger interaction error.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Evidence provider error.
    #[error("evidence error: {0}")]
    Evidence(String),

    /// Upstream VCS API error.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Malformed or invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Network error.
    #[error("network error: {0}")]
    Network(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}
