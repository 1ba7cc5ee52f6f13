//! Error types for alert ingestion.
//!
//! Every variant is handled inside the worker loops; callers only ever see
//! them as log lines and [`ConnectionStatus`] updates.

use mailbell_core::{ConnectionStatus, MailbellError};
use thiserror::Error;

/// Ingestion errors.
#[derive(Debug, Error)]
pub enum IngestError {
    /// No response or no data within the deadline
    #[error("Timed out after {0}s: {1}")]
    Timeout(u64, String),

    /// Could not reach the server
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Server answered with a non-success status
    #[error("Server returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The server closed the event stream
    #[error("Event stream closed by server")]
    StreamClosed,

    /// A payload that could not be understood
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Push inbox could not be read or cleared
    #[error("Push inbox error: {0}")]
    Inbox(String),

    /// Invalid ingestion settings
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Core error
    #[error("Core error: {0}")]
    CoreError(#[from] MailbellError),
}

impl IngestError {
    /// Classify a reqwest error into timeout / connection failure.
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            IngestError::Timeout(timeout_secs, err.to_string())
        } else if err.is_connect() {
            IngestError::ConnectionFailed(err.to_string())
        } else {
            IngestError::HttpError(err)
        }
    }

    /// Classify an HTTP status code.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let body: String = body.chars().take(200).collect();
        match status {
            408 | 504 => IngestError::Timeout(0, format!("server reported HTTP {status}")),
            _ => IngestError::HttpStatus { status, body },
        }
    }

    /// Whether the worker should simply try again later.
    ///
    /// Everything the network or server can do to us is retryable; only
    /// configuration mistakes are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, IngestError::ConfigError(_))
    }

    /// Check if this error is a network-related error.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            IngestError::Timeout(_, _)
                | IngestError::ConnectionFailed(_)
                | IngestError::StreamClosed
                | IngestError::HttpError(_)
        )
    }

    /// Status line to show for this error.
    pub fn status(&self) -> ConnectionStatus {
        match self {
            IngestError::Timeout(_, _) => ConnectionStatus::Timeout,
            IngestError::ConnectionFailed(_) => ConnectionStatus::Unreachable,
            IngestError::HttpStatus { status, .. } => ConnectionStatus::HttpStatus(*status),
            IngestError::HttpError(e) if e.is_timeout() => ConnectionStatus::Timeout,
            IngestError::HttpError(e) if e.is_connect() => ConnectionStatus::Unreachable,
            other => ConnectionStatus::Error(other.to_string()),
        }
    }

    /// Get a user-friendly error message.
    pub fn friendly_message(&self) -> String {
        match self {
            IngestError::Timeout(secs, _) if *secs > 0 => {
                format!("Server did not answer within {secs}s. Check your connection.")
            }
            IngestError::Timeout(_, _) => "Server timed out. Check your connection.".to_string(),
            IngestError::ConnectionFailed(_) => {
                "Cannot reach the alert server. Check the address and your network.".to_string()
            }
            IngestError::HttpStatus { status, .. } if *status >= 500 => {
                format!("Alert server error (HTTP {status}). Retrying.")
            }
            IngestError::HttpStatus { status, .. } => {
                format!("Alert server refused the request (HTTP {status}).")
            }
            IngestError::StreamClosed => "Event stream closed. Reconnecting.".to_string(),
            _ => format!("Error: {self}"),
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;
