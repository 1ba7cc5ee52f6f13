//! Alert dispatcher: the single entry point for confirmed alerts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use mailbell_core::{AlertEvent, AlertLogEntry, AlertSink, UiHandle, UiUpdate};
use tracing::{info, warn};

use crate::actuator::{AlertActuator, TriggerOutcome};
use crate::journal::{AlertJournal, JournalEntry};

/// Lines kept in the in-memory alert log.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Counts and logs each alert, then triggers the actuator exactly once.
///
/// The actuator is called directly; the UI only ever gets a copy of the
/// update and may drop it.
pub struct AlertDispatcher {
    actuator: AlertActuator,
    ui: UiHandle,
    journal: Option<AlertJournal>,
    count: AtomicU64,
    log: Mutex<VecDeque<AlertLogEntry>>,
    log_capacity: usize,
}

impl AlertDispatcher {
    pub fn new(actuator: AlertActuator) -> Self {
        Self {
            actuator,
            ui: UiHandle::detached(),
            journal: None,
            count: AtomicU64::new(0),
            log: Mutex::new(VecDeque::new()),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    pub fn with_ui(mut self, ui: UiHandle) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_journal(mut self, journal: AlertJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    pub fn actuator(&self) -> &AlertActuator {
        &self.actuator
    }

    /// Alerts dispatched so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Alert log, newest first.
    pub fn log(&self) -> Vec<AlertLogEntry> {
        self.log
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Dispatch one alert and report what the actuator did.
    pub async fn dispatch(&self, event: &AlertEvent) -> TriggerOutcome {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = AlertLogEntry::from_event(event);

        {
            let mut log = self.log.lock().unwrap_or_else(|p| p.into_inner());
            log.push_front(entry.clone());
            log.truncate(self.log_capacity);
        }

        let outcome = self.actuator.trigger(&event.subject, &event.sender);
        info!(
            count,
            subject = %event.subject,
            sender = %event.sender,
            timestamp = event.timestamp,
            session_id = %outcome.session_id(),
            extended = outcome.is_extended(),
            "alert dispatched"
        );

        self.ui.post(UiUpdate::AlertReceived { count, entry });

        if let Some(journal) = &self.journal {
            let record = JournalEntry::new(event, outcome.session_id(), outcome.is_extended());
            if let Err(e) = journal.append(&record).await {
                warn!(error = %e, path = %journal.path().display(), "alert journal write failed");
            }
        }

        outcome
    }
}

#[async_trait]
impl AlertSink for AlertDispatcher {
    async fn handle(&self, event: AlertEvent) {
        self.dispatch(&event).await;
    }
}
