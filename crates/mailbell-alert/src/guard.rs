//! Persistence guard: wake locks and audio focus around alert delivery.
//!
//! Locks are handed out as RAII holds. Dropping a [`WakeHold`] releases its
//! wake lock and dropping a [`FocusHold`] abandons audio focus, so every exit
//! path of a channel (completion, cancellation, panic) releases what it took.
//!
//! With background persistence disabled the guard takes no wake locks at all;
//! audio focus is still requested because playback needs it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::capability::{AudioFocus, AudioStream, Capabilities, WakeLock, WakeLockId};

/// Extra wake time on top of the alert duration.
pub const ALERT_WAKE_BUFFER: Duration = Duration::from_secs(10);

pub const ALERT_WAKE_TAG: &str = "mailbell:alert";
pub const PULSE_WAKE_TAG: &str = "mailbell:pulse";
pub const POLL_WAKE_TAG: &str = "mailbell:poll";

/// Hands out wake locks and audio focus.
#[derive(Clone)]
pub struct PersistenceGuard {
    wake_lock: Arc<dyn WakeLock>,
    audio_focus: Arc<dyn AudioFocus>,
    background_persistence: bool,
}

impl PersistenceGuard {
    pub fn new(
        wake_lock: Arc<dyn WakeLock>,
        audio_focus: Arc<dyn AudioFocus>,
        background_persistence: bool,
    ) -> Self {
        Self {
            wake_lock,
            audio_focus,
            background_persistence,
        }
    }

    pub fn from_capabilities(caps: &Capabilities, background_persistence: bool) -> Self {
        Self::new(
            caps.wake_lock.clone(),
            caps.audio_focus.clone(),
            background_persistence,
        )
    }

    pub fn background_persistence(&self) -> bool {
        self.background_persistence
    }

    /// Screen/CPU wake lock covering an alert of `duration`.
    pub fn hold_for_alert(&self, duration: Duration) -> WakeHold {
        self.acquire(ALERT_WAKE_TAG, duration + ALERT_WAKE_BUFFER)
    }

    /// Short wake lock refreshed by the vibration channel.
    pub fn hold_for_pulse(&self, timeout: Duration) -> WakeHold {
        self.acquire(PULSE_WAKE_TAG, timeout)
    }

    /// Wake lock covering one poll cycle.
    pub fn hold_for_poll(&self, interval: Duration) -> WakeHold {
        self.acquire(POLL_WAKE_TAG, interval)
    }

    /// Request audio focus on the alarm stream.
    ///
    /// A refused request is logged and yields an empty hold; playback is
    /// attempted regardless.
    pub fn request_audio_focus(&self) -> FocusHold {
        match self.audio_focus.request(AudioStream::Alarm) {
            Ok(()) => FocusHold {
                focus: Some(self.audio_focus.clone()),
            },
            Err(e) => {
                warn!(error = %e, "audio focus request failed");
                FocusHold { focus: None }
            }
        }
    }

    fn acquire(&self, tag: &'static str, timeout: Duration) -> WakeHold {
        if !self.background_persistence {
            return WakeHold::empty(tag);
        }
        match self.wake_lock.acquire(tag, timeout) {
            Ok(id) => {
                debug!(tag, id, timeout_ms = timeout.as_millis() as u64, "wake lock acquired");
                WakeHold {
                    tag,
                    lock: Some((self.wake_lock.clone(), id)),
                }
            }
            Err(e) => {
                warn!(tag, error = %e, "wake lock acquire failed");
                WakeHold::empty(tag)
            }
        }
    }
}

impl std::fmt::Debug for PersistenceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGuard")
            .field("background_persistence", &self.background_persistence)
            .finish_non_exhaustive()
    }
}

/// A held wake lock, released on drop.
#[must_use = "the wake lock is released as soon as the hold is dropped"]
pub struct WakeHold {
    tag: &'static str,
    lock: Option<(Arc<dyn WakeLock>, WakeLockId)>,
}

impl WakeHold {
    fn empty(tag: &'static str) -> Self {
        Self { tag, lock: None }
    }

    pub fn is_held(&self) -> bool {
        self.lock.is_some()
    }

    /// Release now instead of at end of scope.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some((lock, id)) = self.lock.take() {
            match lock.release(id) {
                Ok(()) => debug!(tag = self.tag, id, "wake lock released"),
                Err(e) => warn!(tag = self.tag, id, error = %e, "wake lock release failed"),
            }
        }
    }
}

impl Drop for WakeHold {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for WakeHold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeHold")
            .field("tag", &self.tag)
            .field("id", &self.lock.as_ref().map(|(_, id)| *id))
            .finish()
    }
}

/// Held audio focus, abandoned on drop.
#[must_use = "audio focus is abandoned as soon as the hold is dropped"]
pub struct FocusHold {
    focus: Option<Arc<dyn AudioFocus>>,
}

impl FocusHold {
    pub fn is_held(&self) -> bool {
        self.focus.is_some()
    }
}

impl Drop for FocusHold {
    fn drop(&mut self) {
        if let Some(focus) = self.focus.take() {
            if let Err(e) = focus.abandon() {
                warn!(error = %e, "audio focus abandon failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;

    #[test]
    fn test_alert_hold_sized_with_buffer() {
        let platform = FakePlatform::new();
        let guard = platform.guard(true);

        let hold = guard.hold_for_alert(Duration::from_secs(70));
        assert!(hold.is_held());
        assert_eq!(platform.wake_lock.held(), 1);
        assert_eq!(
            platform.wake_lock.acquired_timeouts(),
            vec![(ALERT_WAKE_TAG.to_string(), Duration::from_secs(80))]
        );

        drop(hold);
        assert_eq!(platform.wake_lock.held(), 0);
    }

    #[test]
    fn test_persistence_disabled_takes_no_wake_locks() {
        let platform = FakePlatform::new();
        let guard = platform.guard(false);

        let alert = guard.hold_for_alert(Duration::from_secs(10));
        let poll = guard.hold_for_poll(Duration::from_secs(10));
        assert!(!alert.is_held());
        assert!(!poll.is_held());
        assert!(platform.wake_lock.acquired_timeouts().is_empty());

        let focus = guard.request_audio_focus();
        assert!(focus.is_held());
        assert_eq!(platform.audio_focus.requests(), 1);
        drop(focus);
        assert_eq!(platform.audio_focus.abandons(), 1);
    }

    #[test]
    fn test_explicit_release_is_not_repeated_on_drop() {
        let platform = FakePlatform::new();
        let guard = platform.guard(true);

        guard.hold_for_pulse(Duration::from_secs(1)).release();
        assert_eq!(platform.wake_lock.releases(), 1);
        assert_eq!(platform.wake_lock.held(), 0);
    }

    #[test]
    fn test_failed_acquire_yields_empty_hold() {
        let platform = FakePlatform::new();
        platform.wake_lock.set_unavailable(true);
        let guard = platform.guard(true);

        let hold = guard.hold_for_poll(Duration::from_secs(10));
        assert!(!hold.is_held());
    }
}
