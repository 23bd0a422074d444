//! Error types for mail-deploy

use std::time::Duration;
use thiserror::Error;

/// Result type alias for deployment operations
pub type Result<T> = std::result::Result<T, DeployError>;

/// Deployment error types
#[derive(Error, Debug)]
pub enum DeployError {
    /// Bad or missing configuration; never retried
    #[error("Configuration error: {0}")]
    Config(String),

    /// VPS or DNS provider API rejected a call
    #[error("Provider error: {0}")]
    Provider(String),

    /// DNS lookup failure
    #[error("DNS error: {0}")]
    Dns(String),

    /// Remote command transport or action failure
    #[error("Remote error: {0}")]
    Remote(String),

    /// A bounded wait ran out of budget
    #[error("Timed out after {}s waiting for {what}", .waited.as_secs())]
    Timeout { what: String, waited: Duration },

    /// Stage change that would move a job backwards or out of a terminal stage
    #[error("Invalid stage transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DeployError {
    pub fn timeout(what: impl Into<String>, waited: Duration) -> Self {
        DeployError::Timeout {
            what: what.into(),
            waited,
        }
    }
}

impl From<mail_monitor::MonitorError> for DeployError {
    fn from(e: mail_monitor::MonitorError) -> Self {
        DeployError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = DeployError::timeout("SSH on 203.0.113.10", Duration::from_secs(300));
        assert_eq!(
            err.to_string(),
            "Timed out after 300s waiting for SSH on 203.0.113.10"
        );
    }
}
