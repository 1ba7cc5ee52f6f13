//! Error types for mailbell operations.
//!
//! [`MailbellError`] covers configuration, I/O, parsing and platform
//! capability failures. Transport failures of the ingestion workers have their
//! own error type in `mailbell-ingest`; they never reach this enum because the
//! workers swallow and retry them.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`MailbellError`].
pub type Result<T> = std::result::Result<T, MailbellError>;

/// Error type shared by the mailbell crates.
#[derive(Debug, Error)]
pub enum MailbellError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file not found
    #[error("Configuration not found at {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration file is invalid YAML
    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    /// Missing required configuration field
    #[error("Missing required config field: {field}")]
    ConfigMissingField { field: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error with context
    #[error("I/O error {operation}: {path}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory creation failed
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Parsing Errors
    // =========================================================================
    /// JSON parsing error
    #[error("JSON parse error in {context}: {message}")]
    JsonParse {
        context: String,
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Malformed alert payload (non-fatal, the event is dropped)
    #[error("Malformed alert payload: {message}")]
    AlertParse { message: String },

    // =========================================================================
    // Platform Capability Errors
    // =========================================================================
    /// A platform capability is not present on this device
    #[error("Capability unavailable: {capability}")]
    CapabilityUnavailable { capability: String },

    /// A platform capability call failed
    #[error("{capability} call failed: {message}")]
    CapabilityFailed { capability: String, message: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (bug in mailbell)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MailbellError {
    /// Create a ConfigNotFound error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    /// Create a ConfigValidation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Create a JSON parse error
    pub fn json_parse(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::JsonParse {
            context: context.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a capability failure
    pub fn capability_failed(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CapabilityFailed {
            capability: capability.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::ConfigInvalid { .. }
                | Self::ConfigValidation { .. }
                | Self::ConfigMissingField { .. }
        )
    }

    /// Returns true if this error comes from a platform capability
    pub fn is_capability_error(&self) -> bool {
        matches!(
            self,
            Self::CapabilityUnavailable { .. } | Self::CapabilityFailed { .. }
        )
    }

    /// Returns actionable guidance for the user
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::ConfigNotFound { .. } => {
                Some("Create ~/.mailbell/config.yaml or pass --server on the command line")
            }
            Self::ConfigInvalid { .. } => Some("Check YAML syntax in ~/.mailbell/config.yaml"),
            Self::ConfigValidation { .. } => {
                Some("Run 'mailbell check-config' to see the offending value")
            }
            Self::CapabilityUnavailable { .. } => {
                Some("This device lacks the capability; other alert channels still run")
            }
            _ => None,
        }
    }
}
