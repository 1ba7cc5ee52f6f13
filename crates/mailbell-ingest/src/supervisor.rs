//! Connection lifecycle and the liveness watchdog.
//!
//! [`IngestSupervisor::connect`] starts the enabled workers (stream, poll and,
//! with an inbox, push) plus a watchdog task. Every watchdog tick restarts
//! workers whose task has ended while still connected. Dedup state lives in
//! the supervisor, so a restarted worker picks up where its predecessor
//! stopped.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mailbell_alert::{AlertActuator, AlertDispatcher, Capabilities, PersistenceGuard};
//! use mailbell_core::{AlertConfig, ConnectionState, MailbellConfig, UiHandle};
//! use mailbell_ingest::IngestSupervisor;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MailbellConfig::default();
//! let caps = Capabilities::detect();
//! let guard = PersistenceGuard::from_capabilities(&caps, true);
//! let dispatcher = Arc::new(AlertDispatcher::new(AlertActuator::new(caps, AlertConfig::default())?));
//!
//! let supervisor = IngestSupervisor::new(
//!     &config,
//!     Arc::new(ConnectionState::new()),
//!     dispatcher,
//!     guard,
//!     UiHandle::detached(),
//! );
//! supervisor.connect("http://10.0.0.170:8080")?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use mailbell_alert::PersistenceGuard;
use mailbell_core::{
    AlertSink, ConnectionState, ConnectionStatus, IngestConfig, MailbellConfig, PushConfig,
    UiHandle, UiUpdate, WorkerKind, log_worker_event,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dedup::{Forwarder, HighWaterMark, SharedRecent, shared_recent};
use crate::error::{IngestError, Result};
use crate::health::{WatchdogReport, WorkerHealth};
use crate::poll::{PollState, PollWorker};
use crate::push::{FileInbox, PushInbox, PushWorker};
use crate::source::{AlertSource, HttpAlertSource};
use crate::stream::StreamWorker;
use crate::worker::WorkerContext;

/// Everything owned by one connection.
struct Connection {
    source: Arc<dyn AlertSource>,
    token: CancellationToken,
    workers: BTreeMap<WorkerKind, WorkerHealth>,
    stream_mark: Arc<HighWaterMark>,
    push_mark: Arc<HighWaterMark>,
    poll_state: Arc<PollState>,
    shared: Option<SharedRecent>,
    watchdog: Option<JoinHandle<()>>,
}

struct SupervisorInner {
    ingest: Arc<IngestConfig>,
    push: PushConfig,
    state: Arc<ConnectionState>,
    sink: Arc<dyn AlertSink>,
    guard: PersistenceGuard,
    ui: UiHandle,
    inbox: Option<Arc<dyn PushInbox>>,
    connection: Mutex<Option<Connection>>,
}

/// Starts, watches and stops the ingestion workers.
#[derive(Clone)]
pub struct IngestSupervisor {
    inner: Arc<SupervisorInner>,
}

impl IngestSupervisor {
    /// A supervisor for `config`. A push inbox is used when
    /// `push.inbox_path` is set.
    pub fn new(
        config: &MailbellConfig,
        state: Arc<ConnectionState>,
        sink: Arc<dyn AlertSink>,
        guard: PersistenceGuard,
        ui: UiHandle,
    ) -> Self {
        let inbox = config
            .push
            .inbox_path
            .as_ref()
            .map(|path| Arc::new(FileInbox::new(path)) as Arc<dyn PushInbox>);

        Self {
            inner: Arc::new(SupervisorInner {
                ingest: Arc::new(config.ingest.clone()),
                push: config.push.clone(),
                state,
                sink,
                guard,
                ui,
                inbox,
                connection: Mutex::new(None),
            }),
        }
    }

    /// Use `inbox` as the push inbox. Must be called before the supervisor
    /// is cloned.
    pub fn with_push_inbox(mut self, inbox: Arc<dyn PushInbox>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.inbox = Some(inbox),
            None => warn!("push inbox ignored: supervisor already shared"),
        }
        self
    }

    fn connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.inner
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Connect to `server_url` over HTTP and start the workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, server_url: &str) -> Result<()> {
        let source = HttpAlertSource::new(server_url, &self.inner.ingest)?;
        let url = source.base_url().to_string();
        self.connect_with_source(&url, Arc::new(source))
    }

    /// Connect using an already-built source.
    pub fn connect_with_source(&self, server_url: &str, source: Arc<dyn AlertSource>) -> Result<()> {
        let ingest = &self.inner.ingest;
        if !ingest.stream_enabled && !ingest.poll_enabled && self.inner.inbox.is_none() {
            return Err(IngestError::ConfigError(
                "no ingestion worker enabled".to_string(),
            ));
        }

        let mut slot = self.connection();
        if let Some(previous) = slot.take() {
            debug!("replacing existing connection");
            Self::shutdown(previous);
        }

        self.inner.state.connect(server_url);
        info!(server_url, "connecting");

        let mut connection = Connection {
            source,
            token: CancellationToken::new(),
            workers: BTreeMap::new(),
            stream_mark: Arc::new(HighWaterMark::new()),
            push_mark: Arc::new(HighWaterMark::new()),
            poll_state: Arc::new(PollState::starting_now(ingest.recent_capacity)),
            shared: ingest
                .cross_transport_dedup
                .then(|| shared_recent(ingest.recent_capacity)),
            watchdog: None,
        };

        for kind in self.enabled_workers() {
            let mut health = WorkerHealth::new(kind);
            health.started(self.spawn_worker(kind, &connection));
            connection.workers.insert(kind, health);
        }
        connection.watchdog = Some(self.spawn_watchdog(connection.token.clone()));

        *slot = Some(connection);
        Ok(())
    }

    /// Stop every worker and the watchdog. Returns false if not connected.
    pub fn disconnect(&self) -> bool {
        let was_connected = self.inner.state.disconnect();
        let connection = self.connection().take();
        let Some(connection) = connection else {
            return was_connected;
        };

        Self::shutdown(connection);
        for kind in self.enabled_workers() {
            self.inner.ui.status(kind, ConnectionStatus::Disconnected);
        }
        info!("disconnected");
        true
    }

    fn shutdown(mut connection: Connection) {
        connection.token.cancel();
        if let Some(watchdog) = connection.watchdog.take() {
            watchdog.abort();
        }
        // A worker blocked outside a cancellation point is aborted.
        connection.workers.values_mut().for_each(WorkerHealth::stop);
        connection.workers.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    /// Check every worker once and restart the dead ones.
    pub fn watchdog_tick(&self) -> WatchdogReport {
        if !self.inner.state.is_connected() {
            return WatchdogReport::default();
        }

        let mut slot = self.connection();
        let Some(connection) = slot.as_mut() else {
            return WatchdogReport::default();
        };
        if connection.token.is_cancelled() {
            return WatchdogReport::default();
        }

        let mut report = WatchdogReport {
            checked: connection.workers.len(),
            restarted: Vec::new(),
        };

        let dead: Vec<WorkerKind> = connection
            .workers
            .values()
            .filter(|health| !health.is_alive())
            .map(|health| health.kind)
            .collect();

        for kind in dead {
            let handle = self.spawn_worker(kind, connection);
            if let Some(health) = connection.workers.get_mut(&kind) {
                health.started(handle);
                log_worker_event!(kind, "restarted", starts = health.starts);
            }
            self.inner.ui.post(UiUpdate::WorkerRestarted { worker: kind });
            report.restarted.push(kind);
        }

        report
    }

    /// How many times `kind` has been started on the current connection.
    pub fn worker_starts(&self, kind: WorkerKind) -> u32 {
        self.connection()
            .as_ref()
            .and_then(|connection| connection.workers.get(&kind))
            .map_or(0, |health| health.starts)
    }

    pub fn is_alive(&self, kind: WorkerKind) -> bool {
        self.connection()
            .as_ref()
            .and_then(|connection| connection.workers.get(&kind))
            .is_some_and(WorkerHealth::is_alive)
    }

    fn enabled_workers(&self) -> Vec<WorkerKind> {
        let mut kinds = Vec::with_capacity(3);
        if self.inner.ingest.stream_enabled {
            kinds.push(WorkerKind::Stream);
        }
        if self.inner.ingest.poll_enabled {
            kinds.push(WorkerKind::Poll);
        }
        if self.inner.inbox.is_some() {
            kinds.push(WorkerKind::Push);
        }
        kinds
    }

    fn context(&self, kind: WorkerKind, connection: &Connection) -> WorkerContext {
        WorkerContext {
            kind,
            state: self.inner.state.clone(),
            forwarder: Forwarder::new(kind, self.inner.sink.clone(), connection.shared.clone()),
            ui: self.inner.ui.clone(),
            config: self.inner.ingest.clone(),
            token: connection.token.clone(),
        }
    }

    fn spawn_worker(&self, kind: WorkerKind, connection: &Connection) -> JoinHandle<()> {
        let ctx = self.context(kind, connection);
        match kind {
            WorkerKind::Stream => {
                let worker = StreamWorker::new(
                    connection.source.clone(),
                    ctx,
                    connection.stream_mark.clone(),
                );
                tokio::spawn(worker.run())
            }
            WorkerKind::Poll => {
                let worker = PollWorker::new(
                    connection.source.clone(),
                    ctx,
                    connection.poll_state.clone(),
                    self.inner.guard.clone(),
                );
                tokio::spawn(worker.run())
            }
            WorkerKind::Push => match &self.inner.inbox {
                Some(inbox) => {
                    let worker = PushWorker::new(
                        inbox.clone(),
                        ctx,
                        connection.push_mark.clone(),
                        &self.inner.push,
                    );
                    tokio::spawn(worker.run())
                }
                None => tokio::spawn(async {}),
            },
        }
    }

    fn spawn_watchdog(&self, token: CancellationToken) -> JoinHandle<()> {
        let supervisor = self.clone();
        let period = self.inner.ingest.watchdog_interval();
        info!(interval_secs = period.as_secs(), "starting watchdog");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; workers were just started.
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let report = supervisor.watchdog_tick();
                if !report.is_healthy() {
                    warn!(restarted = ?report.restarted, "watchdog restarted workers");
                }
            }
            debug!("watchdog stopped");
        })
    }
}
