//! The seam between ingestion and delivery.

use async_trait::async_trait;

use crate::types::AlertEvent;

/// Receives confirmed, deduplicated alerts from the ingestion workers.
///
/// Implementations must not fail: whatever goes wrong while delivering an
/// alert is handled (and logged) inside the sink.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn handle(&self, event: AlertEvent);
}
