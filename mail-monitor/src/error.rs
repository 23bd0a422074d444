//! Error types for mail-monitor

use thiserror::Error;

/// Result type alias for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Monitor error types
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A probe could not produce a result
    #[error("Probe error: {0}")]
    Probe(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Webhook delivery error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Probe exceeded its time budget
    #[error("{0} timed out")]
    Timeout(String),
}
