//! Stream worker: reads the server's event stream line by line.
//!
//! Any end of the stream (close, read timeout, connection error, HTTP error)
//! is retryable: the worker waits `min(retry, max_backoff)` seconds and
//! reconnects. The retry counter resets once a connection succeeds. A
//! configuration error ends the worker at once.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use mailbell_core::{AlertEvent, ConnectionStatus, WorkerKind, log_worker_event};
use tracing::{debug, error, trace, warn};

use crate::dedup::HighWaterMark;
use crate::error::{IngestError, Result};
use crate::source::{AlertSource, data_payload};
use crate::worker::WorkerContext;

/// Seconds of backoff per failed attempt, before the cap applies.
pub const BACKOFF_UNIT: Duration = Duration::from_secs(1);

pub struct StreamWorker {
    source: Arc<dyn AlertSource>,
    ctx: WorkerContext,
    /// Shared with later instances so a restart does not replay alerts
    high_water: Arc<HighWaterMark>,
}

impl StreamWorker {
    pub fn new(source: Arc<dyn AlertSource>, ctx: WorkerContext, high_water: Arc<HighWaterMark>) -> Self {
        Self {
            source,
            ctx,
            high_water,
        }
    }

    /// Delay before reconnect attempt `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let steps = u64::from(retry).min(self.ctx.config.max_backoff_secs);
        BACKOFF_UNIT * steps as u32
    }

    pub async fn run(self) {
        log_worker_event!(WorkerKind::Stream, "started");
        let mut retry: u32 = 0;

        while self.ctx.is_running() {
            self.ctx.status(ConnectionStatus::Connecting);

            let err = match self.read_stream(&mut retry).await {
                Ok(()) => break,
                Err(e) => e,
            };
            if !self.ctx.is_running() {
                break;
            }

            if !err.is_retryable() {
                error!(error = %err, "stream worker cannot continue");
                self.ctx.status(ConnectionStatus::Error(err.friendly_message()));
                return;
            }

            retry = retry.saturating_add(1);
            if retry > self.ctx.config.max_stream_retries {
                error!(retries = retry - 1, error = %err, "stream worker giving up");
                self.ctx.status(ConnectionStatus::Error(err.friendly_message()));
                return;
            }

            let delay = self.backoff(retry);
            warn!(error = %err, attempt = retry, delay_ms = delay.as_millis() as u64, "event stream lost");
            self.ctx.status(err.status());
            self.ctx.status(ConnectionStatus::Reconnecting {
                attempt: retry,
                delay,
            });

            if !self.ctx.pause(delay).await {
                break;
            }
        }

        self.ctx.status(ConnectionStatus::Disconnected);
        log_worker_event!(WorkerKind::Stream, "stopped");
    }

    /// Read one stream connection until it ends. `Ok` means we were told to stop.
    async fn read_stream(&self, retry: &mut u32) -> Result<()> {
        let mut lines = self.source.open_stream().await?;
        *retry = 0;
        self.ctx.status(ConnectionStatus::Connected);
        debug!("event stream connected");

        let read_timeout = self.ctx.config.stream_read_timeout();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.ctx.token.cancelled() => return Ok(()),
                next = tokio::time::timeout(read_timeout, lines.next()) => next,
            };

            match next {
                Err(_) => {
                    return Err(IngestError::Timeout(
                        read_timeout.as_secs(),
                        "no data on event stream".to_string(),
                    ));
                }
                Ok(None) => return Err(IngestError::StreamClosed),
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(line))) => self.handle_line(&line).await,
            }

            if !self.ctx.is_running() {
                return Ok(());
            }
        }
    }

    async fn handle_line(&self, line: &str) {
        let Some(payload) = data_payload(line) else {
            return;
        };

        let event = match AlertEvent::from_json(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, payload, "skipping malformed stream event");
                return;
            }
        };

        if self.high_water.advance(event.timestamp) {
            self.ctx.forwarder.forward(event).await;
        } else {
            trace!(timestamp = event.timestamp, "stream event already processed");
        }
    }
}
