//! Queue of updates for the user-facing status shell.
//!
//! Background tasks never touch the shell directly. They post [`UiUpdate`]s
//! through a [`UiHandle`]; posting never blocks and is allowed to fail (full
//! queue, shell gone). Nothing that matters for alert delivery goes through
//! this queue.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use crate::types::{AlertLogEntry, WorkerKind};

/// Default capacity of the UI queue.
pub const DEFAULT_UI_QUEUE_CAPACITY: usize = 256;

/// Connection status line shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Timeout,
    Unreachable,
    HttpStatus(u16),
    Error(String),
    Reconnecting { attempt: u32, delay: Duration },
    Disconnected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting..."),
            Self::Connected => write!(f, "Connected"),
            Self::Timeout => write!(f, "Connection timed out"),
            Self::Unreachable => write!(f, "Cannot reach server"),
            Self::HttpStatus(code) => write!(f, "Connection failed: HTTP {code}"),
            Self::Error(message) => write!(f, "Error: {message}"),
            Self::Reconnecting { attempt, delay } => {
                write!(f, "Reconnecting in {}s (attempt {attempt})", delay.as_secs())
            }
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// An update for the status shell.
#[derive(Debug, Clone)]
pub enum UiUpdate {
    /// A worker changed connection status
    Status {
        worker: WorkerKind,
        status: ConnectionStatus,
    },
    /// An alert was dispatched
    AlertReceived { count: u64, entry: AlertLogEntry },
    /// The watchdog restarted a dead worker
    WorkerRestarted { worker: WorkerKind },
    /// The active alert session ended
    SessionEnded { session_id: String },
}

/// Sending side of the UI queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct UiHandle {
    tx: Option<mpsc::Sender<UiUpdate>>,
}

impl UiHandle {
    /// Create a UI queue with the given capacity.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<UiUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// A handle that drops every update (headless runs, tests).
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Post an update without blocking. Returns false if it was dropped.
    pub fn post(&self, update: UiUpdate) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(update) {
            Ok(()) => true,
            Err(e) => {
                trace!(error = %e, "UI update dropped");
                false
            }
        }
    }

    /// Post a connection status for `worker`.
    pub fn status(&self, worker: WorkerKind, status: ConnectionStatus) -> bool {
        self.post(UiUpdate::Status { worker, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_handle_drops_updates() {
        let ui = UiHandle::detached();
        assert!(!ui.status(WorkerKind::Stream, ConnectionStatus::Connected));
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (ui, mut rx) = UiHandle::channel(1);
        assert!(ui.status(WorkerKind::Poll, ConnectionStatus::Connecting));
        assert!(!ui.status(WorkerKind::Poll, ConnectionStatus::Connected));

        match rx.try_recv().unwrap() {
            UiUpdate::Status { worker, status } => {
                assert_eq!(worker, WorkerKind::Poll);
                assert_eq!(status, ConnectionStatus::Connecting);
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn test_closed_queue_drops() {
        let (ui, rx) = UiHandle::channel(4);
        drop(rx);
        assert!(!ui.status(WorkerKind::Push, ConnectionStatus::Disconnected));
    }

    #[test]
    fn test_status_text() {
        assert_eq!(ConnectionStatus::HttpStatus(503).to_string(), "Connection failed: HTTP 503");
        assert_eq!(
            ConnectionStatus::Reconnecting {
                attempt: 3,
                delay: Duration::from_secs(3)
            }
            .to_string(),
            "Reconnecting in 3s (attempt 3)"
        );
    }
}
