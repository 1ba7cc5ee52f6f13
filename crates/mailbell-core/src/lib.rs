//! # mailbell-core
//!
//! Core types, errors, and utilities shared by the mailbell crates.
//!
//! This crate provides:
//! - [`MailbellError`] - Error types for configuration, parsing and platform capabilities
//! - [`logging`] - Tracing setup and log directory helpers
//! - [`config`] - YAML configuration (`~/.mailbell/config.yaml`)
//! - [`types`] - Alert events, connection state and the alert log entry
//! - [`ui`] - Non-blocking queue of updates for the status shell
//! - [`sink`] - The [`AlertSink`] seam between ingestion and delivery
//!
//! ## Example
//!
//! ```no_run
//! use mailbell_core::{MailbellConfig, logging};
//!
//! fn main() -> mailbell_core::Result<()> {
//!     let _guard = logging::init_logging(None, false)?;
//!
//!     let config = MailbellConfig::load(None)?;
//!     config.validate()?;
//!     tracing::info!(server = ?config.server_url, "configuration loaded");
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod sink;
pub mod types;
pub mod ui;

// Re-export main types for convenience
pub use config::{AlertConfig, IngestConfig, JournalConfig, MailbellConfig, PushConfig};
pub use error::{MailbellError, Result};
pub use logging::{LogGuard, init_logging};
pub use sink::AlertSink;
pub use types::{AlertEvent, AlertLogEntry, ConnectionState, WorkerKind};
pub use ui::{ConnectionStatus, UiHandle, UiUpdate};
