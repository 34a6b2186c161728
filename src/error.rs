use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error type shared by the analytics, alerting and update subsystems
#[derive(Error, Debug)]
pub enum EdgeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Network failure worth retrying (timeouts, connection resets, 5xx)
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Non-retryable HTTP failure (4xx, malformed body)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Downloaded artifact does not match the manifest checksum
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Configuration validation error: {0}")]
    ConfigValidation(String),

    /// Post-update health fell below the rollback floor
    #[error("Health degraded: {0}")]
    HealthDegraded(String),

    #[error("Persisted state is corrupt: {0}")]
    PersistenceCorruption(String),

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for edgewatch
pub type Result<T> = std::result::Result<T, EdgeError>;

impl EdgeError {
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        EdgeError::TransientNetwork(msg.into())
    }

    pub fn http<S: Into<String>>(msg: S) -> Self {
        EdgeError::Http(msg.into())
    }

    pub fn integrity<S: Into<String>>(msg: S) -> Self {
        EdgeError::Integrity(msg.into())
    }

    pub fn config_validation<S: Into<String>>(msg: S) -> Self {
        EdgeError::ConfigValidation(msg.into())
    }

    pub fn health_degraded<S: Into<String>>(msg: S) -> Self {
        EdgeError::HealthDegraded(msg.into())
    }

    pub fn persistence_corruption<S: Into<String>>(msg: S) -> Self {
        EdgeError::PersistenceCorruption(msg.into())
    }

    pub fn staging<S: Into<String>>(msg: S) -> Self {
        EdgeError::Staging(msg.into())
    }

    pub fn invalid_version<S: Into<String>>(msg: S) -> Self {
        EdgeError::InvalidVersion(msg.into())
    }

    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        EdgeError::Cancelled(msg.into())
    }

    pub fn other<S: Into<String>>(msg: S) -> Self {
        EdgeError::Other(msg.into())
    }

    /// Whether a retry with backoff may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, EdgeError::TransientNetwork(_))
    }

    /// Short machine-readable name used in telemetry error events
    pub fn kind(&self) -> &'static str {
        match self {
            EdgeError::Io(_) => "io",
            EdgeError::Json(_) => "json",
            EdgeError::TransientNetwork(_) => "transient_network",
            EdgeError::Http(_) => "http",
            EdgeError::Integrity(_) => "integrity",
            EdgeError::ConfigValidation(_) => "config_validation",
            EdgeError::HealthDegraded(_) => "health_degraded",
            EdgeError::PersistenceCorruption(_) => "persistence_corruption",
            EdgeError::Staging(_) => "staging",
            EdgeError::InvalidVersion(_) => "invalid_version",
            EdgeError::Cancelled(_) => "cancelled",
            EdgeError::Other(_) => "other",
        }
    }
}

/// Serializable record of a failure, kept in state and forwarded with telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub kind: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(err: &EdgeError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

impl From<&EdgeError> for ErrorEvent {
    fn from(err: &EdgeError) -> Self {
        ErrorEvent::new(err)
    }
}

impl From<reqwest::Error> for EdgeError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err.is_timeout()
            || err.is_connect()
            || err.is_request()
            || err.status().is_some_and(|s| s.is_server_error());

        if retryable {
            EdgeError::TransientNetwork(err.to_string())
        } else {
            EdgeError::Http(err.to_string())
        }
    }
}
