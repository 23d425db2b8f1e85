//! ClawKangsar error types

use thiserror::Error;

/// ClawKangsar error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target URL rejected before any I/O
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Session key cannot be mapped to a file inside the storage root
    #[error("Invalid session key: {0}")]
    InvalidSessionKey(String),

    /// Headless browser startup or navigation error
    #[error("Browser error: {0}")]
    Browser(String),

    /// Lightweight HTTP fetch error
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Session persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Channel error
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for ClawKangsar operations
pub type Result<T> = std::result::Result<T, Error>;
