//! The alert session shared by the five delivery channels.
//!
//! A session is active from `trigger` until either its deadline passes (the
//! supervisor ends it) or it is cancelled. `active` only ever goes from true
//! to false once, through [`AlertSession::finish`]; channels read it, they
//! never clear it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Title and body of the alert being delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertText {
    pub title: String,
    pub message: String,
}

/// A running alert.
#[derive(Debug)]
pub struct AlertSession {
    id: String,
    started_at: DateTime<Utc>,
    active: AtomicBool,
    deadline: Mutex<Instant>,
    duration: Mutex<Duration>,
    text: Mutex<AlertText>,
    token: CancellationToken,
}

impl AlertSession {
    /// Start an active session ending `duration` from now.
    pub fn new(text: AlertText, duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            active: AtomicBool::new(true),
            deadline: Mutex::new(Instant::now() + duration),
            duration: Mutex::new(duration),
            text: Mutex::new(text),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Duration of the latest trigger.
    pub fn duration(&self) -> Duration {
        *self.duration.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn text(&self) -> AlertText {
        self.text.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Time left until the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline().saturating_duration_since(Instant::now())
    }

    /// Whether channels should run another cycle.
    pub fn should_continue(&self) -> bool {
        self.is_active() && !self.token.is_cancelled() && Instant::now() < self.deadline()
    }

    /// Move the deadline to `now + duration` and replace the alert text.
    ///
    /// Returns false if the session already ended.
    pub fn extend(&self, text: AlertText, duration: Duration) -> bool {
        if !self.is_active() {
            return false;
        }
        *self.deadline.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now() + duration;
        *self.duration.lock().unwrap_or_else(|p| p.into_inner()) = duration;
        *self.text.lock().unwrap_or_else(|p| p.into_inner()) = text;
        debug!(session_id = %self.id, duration_secs = duration.as_secs(), "session extended");
        true
    }

    /// Clear `active`. Only the first caller wins and gets true.
    pub fn finish(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Stop every channel now.
    pub fn cancel(&self) -> bool {
        let ended = self.finish();
        self.token.cancel();
        ended
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token observed by the channel tasks.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Sleep for `interval`, waking early on cancellation.
    ///
    /// Returns whether the channel should run another cycle.
    pub async fn pause(&self, interval: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(interval) => self.should_continue(),
        }
    }

    /// Wait until the deadline passes (following extensions) or the session
    /// is cancelled. Returns true on a normal deadline expiry.
    pub async fn wait_for_deadline(&self) -> bool {
        loop {
            let deadline = self.deadline();
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return false,
                _ = tokio::time::sleep_until(deadline) => {
                    if Instant::now() >= self.deadline() {
                        return true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(title: &str) -> AlertText {
        AlertText {
            title: title.to_string(),
            message: "billing@x.com".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_only_once() {
        let session = AlertSession::new(text("Invoice"), Duration::from_secs(10));
        assert!(session.is_active());
        assert!(session.finish());
        assert!(!session.finish());
        assert!(!session.cancel());
        assert!(!session.should_continue());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let session = AlertSession::new(text("Invoice"), Duration::from_secs(10));
        assert!(session.should_continue());
        assert!(session.wait_for_deadline().await);
        assert!(!session.should_continue());
        assert!(session.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_moves_deadline() {
        let session = AlertSession::new(text("first"), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(session.extend(text("second"), Duration::from_secs(10)));
        assert_eq!(session.remaining(), Duration::from_secs(10));
        assert_eq!(session.text().title, "second");

        let start = Instant::now();
        assert!(session.wait_for_deadline().await);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wakes_pause() {
        let session = std::sync::Arc::new(AlertSession::new(text("x"), Duration::from_secs(60)));
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.pause(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(session.cancel());
        assert!(!waiter.await.unwrap());
        assert!(!session.extend(text("late"), Duration::from_secs(10)));
    }
}
