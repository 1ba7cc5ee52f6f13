//! Liveness bookkeeping for the ingestion workers.
//!
//! A worker is alive while its task has not finished. Workers only finish on
//! disconnect or through a defect (a panic); the watchdog restarts the latter.

use chrono::{DateTime, Utc};
use mailbell_core::WorkerKind;
use serde::Serialize;
use tokio::task::JoinHandle;

/// Task handle and start history of one worker.
#[derive(Debug)]
pub struct WorkerHealth {
    pub kind: WorkerKind,
    handle: Option<JoinHandle<()>>,
    /// Number of times this worker has been started, first start included
    pub starts: u32,
    pub last_started: Option<DateTime<Utc>>,
}

impl WorkerHealth {
    pub fn new(kind: WorkerKind) -> Self {
        Self {
            kind,
            handle: None,
            starts: 0,
            last_started: None,
        }
    }

    /// Record a freshly spawned instance.
    pub fn started(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.handle.replace(handle) {
            previous.abort();
        }
        self.starts += 1;
        self.last_started = Some(Utc::now());
    }

    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Abort the running instance, if any.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Outcome of one watchdog tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchdogReport {
    /// Workers inspected
    pub checked: usize,
    /// Workers found dead and started again
    pub restarted: Vec<WorkerKind>,
}

impl WatchdogReport {
    pub fn is_healthy(&self) -> bool {
        self.restarted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_alive_until_task_finishes() {
        let mut health = WorkerHealth::new(WorkerKind::Poll);
        assert!(!health.is_alive());

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        health.started(tokio::spawn(async move {
            let _ = rx.await;
        }));
        assert!(health.is_alive());
        assert_eq!(health.starts, 1);
        assert!(health.last_started.is_some());

        tx.send(()).unwrap();
        for _ in 0..100 {
            if !health.is_alive() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!health.is_alive());
    }

    #[tokio::test]
    async fn test_panicked_task_is_dead() {
        let mut health = WorkerHealth::new(WorkerKind::Stream);
        let handle = tokio::spawn(async { panic!("worker defect") });
        health.started(handle);
        while health.is_alive() {
            tokio::task::yield_now().await;
        }
        assert_eq!(health.starts, 1);
    }
}
