//! The alert actuator.
//!
//! [`AlertActuator::trigger`] turns "an alert arrived" into a running
//! [`AlertSession`] with five channel tasks under one supervisor task:
//!
//! ```text
//! trigger ──► session (active, deadline, token)
//!               ├── vibration ─┐
//!               ├── urgent     │
//!               ├── alarm      ├── JoinSet owned by the supervisor
//!               ├── companion  │
//!               └── audio ─────┘
//! supervisor: wait for deadline or cancel ─► finish session ─► cancel token
//!             ─► join channels ─► release alert wake lock
//! ```
//!
//! `trigger` is synchronous and returns as soon as the tasks are spawned.
//! A trigger while a session is ringing extends that session instead of
//! starting a second one.

use std::sync::{Arc, Mutex, RwLock};

use mailbell_core::{AlertConfig, MailbellError, Result, UiHandle, UiUpdate};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capability::{Capabilities, ToneSource};
use crate::channels::{self, ChannelContext, ChannelKind, ChannelReport, ChannelTimings};
use crate::guard::{PersistenceGuard, WakeHold};
use crate::session::{AlertSession, AlertText};

/// Result of a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new session started with this many channels.
    Started { session_id: String, channels: usize },
    /// The running session was extended.
    Extended { session_id: String },
}

impl TriggerOutcome {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Started { session_id, .. } | Self::Extended { session_id } => session_id,
        }
    }

    pub fn is_extended(&self) -> bool {
        matches!(self, Self::Extended { .. })
    }
}

/// How a finished session went.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    /// Ended through `cancel` rather than the deadline
    pub cancelled: bool,
    /// One report per channel that returned; a panicked channel has none
    pub reports: Vec<ChannelReport>,
}

impl SessionSummary {
    pub fn report(&self, channel: ChannelKind) -> Option<&ChannelReport> {
        self.reports.iter().find(|r| r.channel == channel)
    }
}

struct ActiveSession {
    session: Arc<AlertSession>,
    _wake: WakeHold,
}

struct ActuatorInner {
    caps: Capabilities,
    config: RwLock<AlertConfig>,
    timings: Arc<ChannelTimings>,
    runtime: Handle,
    ui: UiHandle,
    current: Mutex<Option<ActiveSession>>,
    last_summary: Mutex<Option<SessionSummary>>,
    session_ended: Notify,
}

/// Starts, extends and cancels alert sessions. Cheap to clone.
#[derive(Clone)]
pub struct AlertActuator {
    inner: Arc<ActuatorInner>,
}

impl AlertActuator {
    /// Create an actuator spawning onto the current tokio runtime.
    pub fn new(caps: Capabilities, config: AlertConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| MailbellError::internal(format!("alert actuator needs a runtime: {e}")))?;
        Ok(Self::with_runtime(caps, config, runtime))
    }

    pub fn with_runtime(caps: Capabilities, config: AlertConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(ActuatorInner {
                caps,
                config: RwLock::new(config),
                timings: Arc::new(ChannelTimings::default()),
                runtime,
                ui: UiHandle::detached(),
                current: Mutex::new(None),
                last_summary: Mutex::new(None),
                session_ended: Notify::new(),
            }),
        }
    }

    /// Replace the channel cadence. Must be called before the first trigger.
    pub fn with_timings(self, timings: ChannelTimings) -> Self {
        self.rebuild(|inner| inner.timings = Arc::new(timings))
    }

    pub fn with_ui(self, ui: UiHandle) -> Self {
        self.rebuild(|inner| inner.ui = ui)
    }

    fn rebuild(self, apply: impl FnOnce(&mut ActuatorInner)) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                apply(&mut inner);
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => {
                warn!("actuator already shared, builder call ignored");
                Self { inner }
            }
        }
    }

    /// Current alert settings.
    pub fn config(&self) -> AlertConfig {
        self.inner
            .config
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Replace the alert settings; a running session keeps the old ones.
    pub fn set_config(&self, config: AlertConfig) {
        if let Ok(mut current) = self.inner.config.write() {
            *current = config;
        }
    }

    /// Start an alert session, or extend the running one.
    ///
    /// Never blocks and never fails: channel tasks are spawned and this
    /// returns before any of them completes.
    pub fn trigger(&self, title: &str, message: &str) -> TriggerOutcome {
        let config = self.config();
        let duration = config.duration();
        let text = AlertText {
            title: title.to_string(),
            message: message.to_string(),
        };
        let guard = PersistenceGuard::from_capabilities(&self.inner.caps, config.background_persistence);

        let mut current = lock(&self.inner.current);

        if let Some(active) = current.as_mut() {
            let session = &active.session;
            if session.remaining() > std::time::Duration::ZERO && session.extend(text.clone(), duration) {
                if let Err(e) = channels::urgent::post(
                    self.inner.caps.notifications.as_ref(),
                    &text,
                    duration,
                    &self.inner.timings,
                ) {
                    debug!(error = %e, "urgent notification re-post failed");
                }
                active._wake = guard.hold_for_alert(duration);
                info!(session_id = %session.id(), title, "alert session extended");
                return TriggerOutcome::Extended {
                    session_id: session.id().to_string(),
                };
            }
        }

        let session = Arc::new(AlertSession::new(text, duration));
        let wake = guard.hold_for_alert(duration);
        let ctx = ChannelContext {
            session: session.clone(),
            caps: self.inner.caps.clone(),
            guard,
            timings: self.inner.timings.clone(),
            tone: ToneSource::resolve(config.ringtone.as_deref()),
        };

        let mut channel_tasks = JoinSet::new();
        for kind in ChannelKind::ALL {
            channel_tasks.spawn_on(channels::run(kind, ctx.clone()), &self.inner.runtime);
        }
        let channels = channel_tasks.len();

        // Replacing an expired session releases its wake lock.
        *current = Some(ActiveSession {
            session: session.clone(),
            _wake: wake,
        });
        drop(current);

        let inner = self.inner.clone();
        let supervised = session.clone();
        self.inner
            .runtime
            .spawn(async move { supervise(inner, supervised, channel_tasks).await });

        info!(
            session_id = %session.id(),
            title,
            duration_secs = duration.as_secs(),
            channels,
            "alert session started"
        );
        TriggerOutcome::Started {
            session_id: session.id().to_string(),
            channels,
        }
    }

    /// Stop the running session. Returns false if nothing was ringing.
    pub fn cancel(&self) -> bool {
        let current = lock(&self.inner.current);
        match current.as_ref() {
            Some(active) if active.session.cancel() => {
                info!(session_id = %active.session.id(), "alert session cancelled");
                true
            }
            _ => false,
        }
    }

    pub fn is_alerting(&self) -> bool {
        lock(&self.inner.current)
            .as_ref()
            .is_some_and(|active| active.session.is_active())
    }

    /// The running session, if any.
    pub fn current_session(&self) -> Option<Arc<AlertSession>> {
        lock(&self.inner.current)
            .as_ref()
            .map(|active| active.session.clone())
    }

    /// Summary of the most recently finished session.
    pub fn last_summary(&self) -> Option<SessionSummary> {
        lock(&self.inner.last_summary).clone()
    }

    /// Wait until no session is ringing and its channels have stopped.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.session_ended.notified();
            if lock(&self.inner.current).is_none() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for AlertActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertActuator")
            .field("alerting", &self.is_alerting())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the channel tasks of one session and ends it.
async fn supervise(
    inner: Arc<ActuatorInner>,
    session: Arc<AlertSession>,
    mut channel_tasks: JoinSet<ChannelReport>,
) {
    let cancelled = loop {
        let expired = session.wait_for_deadline().await;
        let ended = {
            let _current = lock(&inner.current);
            // An extension may have landed between the wakeup and the lock.
            if expired && session.is_active() && Instant::now() < session.deadline() {
                None
            } else {
                Some(!session.finish())
            }
        };
        if let Some(cancelled) = ended {
            break cancelled;
        }
    };
    session.token().cancel();

    let mut reports = Vec::with_capacity(ChannelKind::ALL.len());
    while let Some(joined) = channel_tasks.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => warn!(session_id = %session.id(), error = %e, "alert channel task failed"),
        }
    }
    reports.sort_by_key(|r| r.channel);

    info!(
        session_id = %session.id(),
        cancelled,
        channels = reports.len(),
        "alert session ended"
    );
    *lock(&inner.last_summary) = Some(SessionSummary {
        session_id: session.id().to_string(),
        cancelled,
        reports,
    });

    // The slot is cleared only once every channel has stopped and the
    // summary is stored, so wait_idle never returns early.
    let finished = {
        let mut current = lock(&inner.current);
        match current.as_ref() {
            Some(active) if active.session.id() == session.id() => current.take(),
            _ => None,
        }
    };
    // Releases the alert wake lock.
    drop(finished);

    inner.ui.post(UiUpdate::SessionEnded {
        session_id: session.id().to_string(),
    });
    inner.session_ended.notify_waiters();
}
