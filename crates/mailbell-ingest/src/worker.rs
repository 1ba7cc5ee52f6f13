//! State shared by every ingestion worker.

use std::sync::Arc;
use std::time::Duration;

use mailbell_core::{ConnectionState, ConnectionStatus, IngestConfig, UiHandle, WorkerKind};
use tokio_util::sync::CancellationToken;

use crate::dedup::Forwarder;

/// What a worker needs besides its transport.
#[derive(Clone)]
pub struct WorkerContext {
    pub kind: WorkerKind,
    pub state: Arc<ConnectionState>,
    pub forwarder: Forwarder,
    pub ui: UiHandle,
    pub config: Arc<IngestConfig>,
    /// Cancelled on disconnect
    pub token: CancellationToken,
}

impl WorkerContext {
    /// Whether the worker should run another iteration.
    pub fn is_running(&self) -> bool {
        self.state.is_connected() && !self.token.is_cancelled()
    }

    pub fn status(&self, status: ConnectionStatus) {
        self.ui.status(self.kind, status);
    }

    /// Sleep for `delay`, waking early on disconnect. Returns whether to go on.
    pub async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(delay) => self.is_running(),
        }
    }
}
