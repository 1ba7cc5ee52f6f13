//! Poll worker: asks the server for alerts since the previous poll.

use std::sync::{Arc, Mutex};

use mailbell_alert::PersistenceGuard;
use mailbell_core::types::now_epoch_secs;
use mailbell_core::{ConnectionStatus, WorkerKind, log_worker_event};
use tracing::{debug, trace, warn};

use crate::dedup::RecentlySeen;
use crate::source::AlertSource;
use crate::worker::WorkerContext;

/// Dedup state that outlives a single worker instance, so a restarted poll
/// worker does not replay what its predecessor already forwarded.
#[derive(Debug)]
pub struct PollState {
    recent: Mutex<RecentlySeen>,
    since: Mutex<f64>,
}

impl PollState {
    /// Start polling from `since` (seconds since the epoch).
    pub fn new(capacity: usize, since: f64) -> Self {
        Self {
            recent: Mutex::new(RecentlySeen::new(capacity)),
            since: Mutex::new(since),
        }
    }

    /// Start polling from now.
    pub fn starting_now(capacity: usize) -> Self {
        Self::new(capacity, now_epoch_secs())
    }

    pub fn since(&self) -> f64 {
        self.since.lock().map(|since| *since).unwrap_or(0.0)
    }

    fn set_since(&self, value: f64) {
        if let Ok(mut since) = self.since.lock() {
            *since = value;
        }
    }

    /// Record `key`; false if it was seen recently.
    pub fn insert(&self, key: u64) -> bool {
        self.recent
            .lock()
            .map(|mut recent| recent.insert(key))
            .unwrap_or(true)
    }

    pub fn seen(&self) -> usize {
        self.recent.lock().map(|recent| recent.len()).unwrap_or(0)
    }
}

pub struct PollWorker {
    source: Arc<dyn AlertSource>,
    ctx: WorkerContext,
    state: Arc<PollState>,
    guard: PersistenceGuard,
}

impl PollWorker {
    pub fn new(
        source: Arc<dyn AlertSource>,
        ctx: WorkerContext,
        state: Arc<PollState>,
        guard: PersistenceGuard,
    ) -> Self {
        Self {
            source,
            ctx,
            state,
            guard,
        }
    }

    pub async fn run(self) {
        log_worker_event!(WorkerKind::Poll, "started");
        let interval = self.ctx.config.poll_interval();
        let mut healthy = false;

        while self.ctx.is_running() {
            let requested_at = now_epoch_secs();
            let since = self.state.since();

            let hold = self.guard.hold_for_poll(interval);
            let result = tokio::select! {
                biased;
                _ = self.ctx.token.cancelled() => break,
                result = self.source.poll(since) => result,
            };
            drop(hold);

            match result {
                Ok(events) => {
                    if !healthy {
                        self.ctx.status(ConnectionStatus::Connected);
                        healthy = true;
                    }
                    self.state.set_since(requested_at);
                    let forwarded = self.forward_new(events).await;
                    if forwarded > 0 {
                        debug!(forwarded, "poll delivered alerts");
                    }
                }
                Err(e) => {
                    warn!(error = %e, network = e.is_network_error(), "poll failed");
                    self.ctx.status(e.status());
                    healthy = false;
                }
            }

            if !self.ctx.pause(interval).await {
                break;
            }
        }

        log_worker_event!(WorkerKind::Poll, "stopped");
    }

    async fn forward_new(&self, events: Vec<mailbell_core::AlertEvent>) -> usize {
        let mut forwarded = 0;
        for event in events {
            if !self.state.insert(event.dedup_key()) {
                trace!(timestamp = event.timestamp, "poll event already seen");
                continue;
            }
            if self.ctx.forwarder.forward(event).await {
                forwarded += 1;
            }
        }
        forwarded
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use mailbell_alert::testing::FakePlatform;
    use mailbell_core::{AlertEvent, AlertSink, ConnectionState, IngestConfig, UiHandle};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::dedup::Forwarder;
    use crate::error::{IngestError, Result};
    use crate::source::LineStream;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<AlertEvent>>,
    }

    #[async_trait]
    impl AlertSink for Recorder {
        async fn handle(&self, event: AlertEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[derive(Default)]
    struct ScriptedPolls {
        responses: Mutex<VecDeque<Result<Vec<AlertEvent>>>>,
        sinces: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl AlertSource for ScriptedPolls {
        async fn open_stream(&self) -> Result<LineStream> {
            Err(IngestError::StreamClosed)
        }

        async fn poll(&self, since: f64) -> Result<Vec<AlertEvent>> {
            self.sinces.lock().unwrap().push(since);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn context(sink: Arc<Recorder>) -> WorkerContext {
        let state = Arc::new(ConnectionState::new());
        state.connect("http://test");
        WorkerContext {
            kind: WorkerKind::Poll,
            state,
            forwarder: Forwarder::new(WorkerKind::Poll, sink, None),
            ui: UiHandle::detached(),
            config: Arc::new(IngestConfig::default()),
            token: CancellationToken::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_timestamp_forwarded_once() {
        let source = Arc::new(ScriptedPolls::default());
        {
            let mut responses = source.responses.lock().unwrap();
            responses.push_back(Ok(vec![
                AlertEvent::new("A", "x", 7.0),
                AlertEvent::new("A again", "x", 7.0),
            ]));
            responses.push_back(Ok(vec![AlertEvent::new("A", "x", 7.0)]));
            responses.push_back(Ok(vec![AlertEvent::new("B", "y", 8.0)]));
        }
        let sink = Arc::new(Recorder::default());
        let ctx = context(sink.clone());
        let token = ctx.token.clone();
        let platform = FakePlatform::new();
        let state = Arc::new(PollState::new(100, 0.0));
        let worker = PollWorker::new(source.clone(), ctx, state.clone(), platform.guard(true));

        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_secs(25)).await;
        token.cancel();
        handle.await.unwrap();

        let subjects: Vec<String> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.subject.clone())
            .collect();
        assert_eq!(subjects, vec!["A", "B"]);
        assert_eq!(state.seen(), 2);

        // One poll wake lock per request, each released right after.
        let polls = source.sinces.lock().unwrap().len();
        assert_eq!(platform.wake_lock.acquired_with_tag("mailbell:poll"), polls);
        assert_eq!(platform.wake_lock.held(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_every_interval_and_advances_since() {
        let source = Arc::new(ScriptedPolls::default());
        let sink = Arc::new(Recorder::default());
        let ctx = context(sink);
        let token = ctx.token.clone();
        let state = Arc::new(PollState::new(100, 0.0));
        let worker = PollWorker::new(
            source.clone(),
            ctx,
            state,
            FakePlatform::new().guard(false),
        );

        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_secs(25)).await;
        token.cancel();
        handle.await.unwrap();

        let sinces = source.sinces.lock().unwrap();
        // t = 0, 10, 20
        assert_eq!(sinces.len(), 3);
        assert_eq!(sinces[0], 0.0);
        assert!(sinces[1] > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_do_not_stop_the_loop() {
        let source = Arc::new(ScriptedPolls::default());
        {
            let mut responses = source.responses.lock().unwrap();
            responses.push_back(Err(IngestError::from_http_status(503, "")));
            responses.push_back(Ok(vec![AlertEvent::new("late", "x", 1.0)]));
        }
        let sink = Arc::new(Recorder::default());
        let ctx = context(sink.clone());
        let token = ctx.token.clone();
        let worker = PollWorker::new(
            source,
            ctx,
            Arc::new(PollState::new(100, 0.0)),
            FakePlatform::new().guard(true),
        );

        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_secs(15)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_state_shared_across_instances() {
        let state = PollState::new(2, 5.0);
        assert!(state.insert(1));
        assert!(!state.insert(1));
        assert!(state.insert(2));
        assert!(state.insert(3));
        // capacity 2: key 1 evicted
        assert!(state.insert(1));
        assert_eq!(state.since(), 5.0);
    }
}
