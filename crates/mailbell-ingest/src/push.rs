//! Push inbox: the third ingestion transport.
//!
//! A platform push service drops one pending payload at a time into an inbox
//! slot. [`PushWorker`] drains that slot, turns the payload into an
//! [`AlertEvent`] and forwards it if its timestamp is newer than the last one
//! processed.
//!
//! Two payload kinds are understood:
//!
//! ```json
//! {"subject": "Invoice", "from": "billing@x.com", "timestamp": 1000}
//! {"kind": "notification", "package": "com.google.android.gm", "title": "Price alert", "text": "BTC above 70k"}
//! ```
//!
//! Relayed notifications only become alerts when [`NotificationFilter`]
//! accepts them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mailbell_core::types::now_epoch_secs;
use mailbell_core::{AlertEvent, ConnectionStatus, PushConfig, WorkerKind, log_worker_event};
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::dedup::HighWaterMark;
use crate::error::{IngestError, Result};
use crate::worker::WorkerContext;

/// Subject used when a push payload has none.
pub const PUSH_DEFAULT_SUBJECT: &str = "Email Alert";

/// Sender used when a push payload has none.
pub const PUSH_DEFAULT_SENDER: &str = "Unknown";

/// Source of pending push payloads.
#[async_trait]
pub trait PushInbox: Send + Sync {
    /// Take the pending payload, clearing the slot.
    async fn take(&self) -> Result<Option<PushMessage>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum EnvelopeKind {
    Push,
    Notification,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    kind: Option<EnvelopeKind>,
    subject: Option<String>,
    from: Option<String>,
    timestamp: Option<f64>,
    package: Option<String>,
    title: Option<String>,
    text: Option<String>,
}

/// A payload taken from the push inbox.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// A mail alert pushed by the alert server
    Push {
        subject: Option<String>,
        from: Option<String>,
        timestamp: Option<f64>,
    },
    /// A notification of another app relayed to us
    Notification {
        package: String,
        title: String,
        text: String,
        timestamp: Option<f64>,
    },
}

impl PushMessage {
    pub fn from_json(payload: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(payload)
            .map_err(|e| IngestError::MalformedPayload(format!("push payload: {e}")))?;

        Ok(match envelope.kind.unwrap_or(EnvelopeKind::Push) {
            EnvelopeKind::Push => PushMessage::Push {
                subject: envelope.subject,
                from: envelope.from,
                timestamp: envelope.timestamp,
            },
            EnvelopeKind::Notification => PushMessage::Notification {
                package: envelope.package.unwrap_or_default(),
                title: envelope.title.unwrap_or_default(),
                text: envelope.text.unwrap_or_default(),
                timestamp: envelope.timestamp,
            },
        })
    }

    /// The alert this payload stands for, if any.
    pub fn into_event(self, filter: &NotificationFilter) -> Option<AlertEvent> {
        match self {
            PushMessage::Push {
                subject,
                from,
                timestamp,
            } => Some(AlertEvent::new(
                subject.unwrap_or_else(|| PUSH_DEFAULT_SUBJECT.to_string()),
                from.unwrap_or_else(|| PUSH_DEFAULT_SENDER.to_string()),
                timestamp.unwrap_or_else(now_epoch_secs),
            )),
            PushMessage::Notification {
                package,
                title,
                text,
                timestamp,
            } => {
                if !filter.accepts(&package, &title, &text) {
                    trace!(package = %package, "relayed notification ignored");
                    return None;
                }
                Some(AlertEvent::new(
                    title,
                    package,
                    timestamp.unwrap_or_else(now_epoch_secs),
                ))
            }
        }
    }
}

/// Decides which relayed notifications are alerts.
#[derive(Debug, Clone)]
pub struct NotificationFilter {
    packages: Vec<String>,
    keywords: Vec<String>,
}

impl Default for NotificationFilter {
    fn default() -> Self {
        Self {
            packages: ["tradingview", "email", "gmail", "qq.reader"]
                .into_iter()
                .map(String::from)
                .collect(),
            keywords: ["alert", "警报", "警報", "提醒"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl NotificationFilter {
    pub fn accepts(&self, package: &str, title: &str, text: &str) -> bool {
        let package = package.to_lowercase();
        if !self.packages.iter().any(|p| package.contains(p.as_str())) {
            return false;
        }
        let content = format!("{title} {text}").to_lowercase();
        self.keywords.iter().any(|k| content.contains(k.as_str()))
    }
}

/// Inbox slot stored as a single JSON file.
#[derive(Debug, Clone)]
pub struct FileInbox {
    path: PathBuf,
}

impl FileInbox {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a payload is moved while it is being read.
    pub fn claim_path(&self) -> PathBuf {
        self.path.with_extension("claimed")
    }

    /// Move the pending payload out of the slot. A writer that drops a new
    /// payload afterwards fills a fresh slot instead of losing it.
    async fn claim(&self) -> Result<Option<PathBuf>> {
        let claimed = self.claim_path();
        match tokio::fs::rename(&self.path, &claimed).await {
            Ok(()) => Ok(Some(claimed)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IngestError::Inbox(format!(
                "cannot claim {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[async_trait]
impl PushInbox for FileInbox {
    async fn take(&self) -> Result<Option<PushMessage>> {
        let Some(claimed) = self.claim().await? else {
            return Ok(None);
        };

        let read = tokio::fs::read_to_string(&claimed).await;
        // Removed whether or not the payload parses, so a bad payload is
        // not retried forever.
        if let Err(e) = tokio::fs::remove_file(&claimed).await {
            warn!(path = %claimed.display(), error = %e, "cannot remove claimed push payload");
        }
        let content = read.map_err(|e| {
            IngestError::Inbox(format!("cannot read {}: {e}", claimed.display()))
        })?;

        if content.trim().is_empty() {
            return Ok(None);
        }
        PushMessage::from_json(&content).map(Some)
    }
}

pub struct PushWorker {
    inbox: Arc<dyn PushInbox>,
    ctx: WorkerContext,
    high_water: Arc<HighWaterMark>,
    filter: NotificationFilter,
    check_interval: Duration,
    error_backoff: Duration,
}

impl PushWorker {
    pub fn new(
        inbox: Arc<dyn PushInbox>,
        ctx: WorkerContext,
        high_water: Arc<HighWaterMark>,
        config: &PushConfig,
    ) -> Self {
        Self {
            inbox,
            ctx,
            high_water,
            filter: NotificationFilter::default(),
            check_interval: Duration::from_secs(config.check_interval_secs),
            error_backoff: Duration::from_secs(config.error_backoff_secs),
        }
    }

    pub async fn run(self) {
        log_worker_event!(WorkerKind::Push, "started");
        self.ctx.status(ConnectionStatus::Connected);

        while self.ctx.is_running() {
            let delay = match self.check_once().await {
                Ok(()) => self.check_interval,
                Err(e) => {
                    warn!(error = %e, "push inbox check failed");
                    self.error_backoff
                }
            };

            if !self.ctx.pause(delay).await {
                break;
            }
        }

        log_worker_event!(WorkerKind::Push, "stopped");
    }

    async fn check_once(&self) -> Result<()> {
        let Some(message) = self.inbox.take().await? else {
            return Ok(());
        };

        let Some(event) = message.into_event(&self.filter) else {
            return Ok(());
        };

        if self.high_water.advance(event.timestamp) {
            debug!(subject = %event.subject, "push alert received");
            self.ctx.forwarder.forward(event).await;
        } else {
            trace!(timestamp = event.timestamp, "push event already processed");
        }
        Ok(())
    }
}
