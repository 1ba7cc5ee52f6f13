//! Shared type definitions used across mailbell crates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MailbellError, Result};

/// Subject used when the server omits one.
pub const UNKNOWN_SUBJECT: &str = "Unknown subject";

/// Sender used when the server omits one.
pub const UNKNOWN_SENDER: &str = "Unknown sender";

/// A "new mail" notification received from the alert source.
///
/// Immutable once received. Identity for deduplication is the timestamp, see
/// [`AlertEvent::dedup_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub subject: String,
    #[serde(rename = "from")]
    pub sender: String,
    pub timestamp: f64,
}

/// Wire shape of an alert; every field is optional on the wire.
#[derive(Debug, Deserialize)]
struct WireAlert {
    subject: Option<String>,
    from: Option<String>,
    timestamp: Option<f64>,
}

impl From<WireAlert> for AlertEvent {
    fn from(wire: WireAlert) -> Self {
        Self {
            subject: wire.subject.unwrap_or_else(|| UNKNOWN_SUBJECT.to_string()),
            sender: wire.from.unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
            timestamp: wire.timestamp.unwrap_or_else(now_epoch_secs),
        }
    }
}

impl AlertEvent {
    pub fn new(subject: impl Into<String>, sender: impl Into<String>, timestamp: f64) -> Self {
        Self {
            subject: subject.into(),
            sender: sender.into(),
            timestamp,
        }
    }

    /// Parse one JSON alert object (`{"subject", "from", "timestamp"}`).
    ///
    /// Missing subject/sender get placeholder text; a missing timestamp is
    /// replaced by the local arrival time.
    pub fn from_json(payload: &str) -> Result<Self> {
        let wire: WireAlert =
            serde_json::from_str(payload).map_err(|e| MailbellError::AlertParse {
                message: e.to_string(),
            })?;
        Ok(wire.into())
    }

    /// Parse a JSON value already extracted from a larger document.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let wire: WireAlert =
            serde_json::from_value(value).map_err(|e| MailbellError::AlertParse {
                message: e.to_string(),
            })?;
        Ok(wire.into())
    }

    /// Deduplication key: the exact bit pattern of the timestamp.
    ///
    /// Two distinct alerts carrying the same timestamp collapse into one.
    pub fn dedup_key(&self) -> u64 {
        // Normalise -0.0 so it matches 0.0.
        (self.timestamp + 0.0).to_bits()
    }

    /// `"subject / sender"`, the line shown in the alert log.
    pub fn summary(&self) -> String {
        format!("{} / {}", self.subject, self.sender)
    }
}

/// Seconds since the Unix epoch, with sub-second precision.
pub fn now_epoch_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// The ingestion transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Long-lived SSE stream
    Stream,
    /// Periodic poll request
    Poll,
    /// Platform push inbox
    Push,
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Poll => write!(f, "poll"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// Whether the client is connected, and to which server.
///
/// Written by connect/disconnect and read by every worker at the top of each
/// loop iteration.
#[derive(Debug, Default)]
pub struct ConnectionState {
    connected: AtomicBool,
    server_url: RwLock<String>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the client connected to `server_url`.
    pub fn connect(&self, server_url: impl Into<String>) {
        if let Ok(mut url) = self.server_url.write() {
            *url = server_url.into();
        }
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Mark the client disconnected. Returns true if it was connected.
    pub fn disconnect(&self) -> bool {
        self.connected.swap(false, Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn server_url(&self) -> String {
        self.server_url
            .read()
            .map(|url| url.clone())
            .unwrap_or_default()
    }
}

/// One line of the in-app alert log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertLogEntry {
    pub subject: String,
    pub sender: String,
    /// Server-side event timestamp
    pub timestamp: f64,
    /// When the alert reached the dispatcher
    pub received_at: DateTime<Utc>,
}

impl AlertLogEntry {
    pub fn from_event(event: &AlertEvent) -> Self {
        Self {
            subject: event.subject.clone(),
            sender: event.sender.clone(),
            timestamp: event.timestamp,
            received_at: Utc::now(),
        }
    }

    /// `"subject / sender"`.
    pub fn summary(&self) -> String {
        format!("{} / {}", self.subject, self.sender)
    }

    /// `"[HH:MM:SS] subject / sender"` in local time.
    pub fn format_line(&self) -> String {
        let local: DateTime<Local> = self.received_at.into();
        format!("[{}] {}", local.format("%H:%M:%S"), self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_event() {
        let event =
            AlertEvent::from_json(r#"{"subject":"Invoice","from":"billing@x.com","timestamp":1000}"#)
                .unwrap();
        assert_eq!(event.subject, "Invoice");
        assert_eq!(event.sender, "billing@x.com");
        assert_eq!(event.timestamp, 1000.0);
        assert_eq!(event.summary(), "Invoice / billing@x.com");
    }

    #[test]
    fn test_parse_missing_fields_uses_placeholders() {
        let before = now_epoch_secs();
        let event = AlertEvent::from_json("{}").unwrap();
        assert_eq!(event.subject, UNKNOWN_SUBJECT);
        assert_eq!(event.sender, UNKNOWN_SENDER);
        assert!(event.timestamp >= before);
    }

    #[test]
    fn test_parse_malformed_is_alert_parse_error() {
        let err = AlertEvent::from_json("{not json").unwrap_err();
        assert!(matches!(err, MailbellError::AlertParse { .. }));

        let err = AlertEvent::from_json(r#"{"timestamp":"soon"}"#).unwrap_err();
        assert!(matches!(err, MailbellError::AlertParse { .. }));
    }

    #[test]
    fn test_dedup_key_by_timestamp_only() {
        let a = AlertEvent::new("A", "x", 5.0);
        let b = AlertEvent::new("B", "y", 5.0);
        let c = AlertEvent::new("A", "x", 5.1);
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), c.dedup_key());
        assert_eq!(
            AlertEvent::new("z", "z", -0.0).dedup_key(),
            AlertEvent::new("z", "z", 0.0).dedup_key()
        );
    }

    #[test]
    fn test_connection_state_transitions() {
        let state = ConnectionState::new();
        assert!(!state.is_connected());

        state.connect("http://10.0.0.170:8080");
        assert!(state.is_connected());
        assert_eq!(state.server_url(), "http://10.0.0.170:8080");

        assert!(state.disconnect());
        assert!(!state.disconnect());
        assert!(!state.is_connected());
    }

    #[test]
    fn test_log_entry_line() {
        let entry = AlertLogEntry::from_event(&AlertEvent::new("Invoice", "billing@x.com", 1.0));
        assert_eq!(entry.summary(), "Invoice / billing@x.com");
        assert!(entry.format_line().ends_with("] Invoice / billing@x.com"));
    }

    #[test]
    fn test_worker_kind_display() {
        assert_eq!(WorkerKind::Stream.to_string(), "stream");
        assert_eq!(WorkerKind::Poll.to_string(), "poll");
        assert_eq!(WorkerKind::Push.to_string(), "push");
    }
}
