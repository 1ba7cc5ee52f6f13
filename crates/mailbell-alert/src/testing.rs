//! In-memory capability fakes for deterministic tests.
//!
//! Every fake records its calls together with the (tokio) instant they were
//! made, so tests running with a paused clock can assert timing bounds.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::capability::{
    AlarmScheduler, AudioFocus, AudioPlayer, AudioStream, Capabilities, CapabilityError,
    CapabilityResult, Notification, NotificationPoster, Playback, Vibrator, WakeLock, WakeLockId,
};
use crate::guard::PersistenceGuard;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One fake per capability, shared with the [`Capabilities`] handed out.
#[derive(Clone, Default)]
pub struct FakePlatform {
    pub vibrator: Arc<FakeVibrator>,
    pub audio: Arc<FakeAudioPlayer>,
    pub wake_lock: Arc<FakeWakeLock>,
    pub audio_focus: Arc<FakeAudioFocus>,
    pub notifications: Arc<FakeNotificationPoster>,
    pub alarms: Arc<FakeAlarmScheduler>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            vibrator: self.vibrator.clone(),
            audio: self.audio.clone(),
            wake_lock: self.wake_lock.clone(),
            audio_focus: self.audio_focus.clone(),
            notifications: self.notifications.clone(),
            alarms: self.alarms.clone(),
        }
    }

    pub fn guard(&self, background_persistence: bool) -> PersistenceGuard {
        PersistenceGuard::from_capabilities(&self.capabilities(), background_persistence)
    }
}

#[derive(Default)]
pub struct FakeVibrator {
    unavailable: AtomicBool,
    failing: AtomicBool,
    pulses: Mutex<Vec<(Instant, Duration)>>,
    cancels: AtomicUsize,
}

impl FakeVibrator {
    /// Report the motor as missing on every call.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail every call with a transient error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn pulses(&self) -> Vec<(Instant, Duration)> {
        lock(&self.pulses).clone()
    }

    pub fn pulse_count(&self) -> usize {
        lock(&self.pulses).len()
    }

    pub fn last_pulse_at(&self) -> Option<Instant> {
        lock(&self.pulses).last().map(|(at, _)| *at)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    fn check(&self) -> CapabilityResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CapabilityError::unavailable("vibrator"));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CapabilityError::failed("vibrator", "motor busy"));
        }
        Ok(())
    }
}

impl Vibrator for FakeVibrator {
    fn vibrate(&self, duration: Duration) -> CapabilityResult<()> {
        self.check()?;
        lock(&self.pulses).push((Instant::now(), duration));
        Ok(())
    }

    fn cancel(&self) -> CapabilityResult<()> {
        self.check()?;
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAudioPlayer {
    unavailable: AtomicBool,
    playing: AtomicBool,
    started: Mutex<Vec<Playback>>,
    checks: AtomicUsize,
    stops: Mutex<Vec<Instant>>,
}

impl FakeAudioPlayer {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Simulate playback ending on its own.
    pub fn finish_playback(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    pub fn started(&self) -> Vec<Playback> {
        lock(&self.started).clone()
    }

    /// Number of `is_playing` checks made.
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> Vec<Instant> {
        lock(&self.stops).clone()
    }
}

impl AudioPlayer for FakeAudioPlayer {
    fn start(&self, playback: &Playback) -> CapabilityResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CapabilityError::unavailable("audio"));
        }
        lock(&self.started).push(playback.clone());
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.playing.load(Ordering::SeqCst)
    }

    fn stop(&self) -> CapabilityResult<()> {
        self.playing.store(false, Ordering::SeqCst);
        lock(&self.stops).push(Instant::now());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeWakeLock {
    unavailable: AtomicBool,
    next_id: AtomicU64,
    held: Mutex<BTreeSet<WakeLockId>>,
    acquired: Mutex<Vec<(String, Duration)>>,
    releases: AtomicUsize,
}

impl FakeWakeLock {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Locks currently held.
    pub fn held(&self) -> usize {
        lock(&self.held).len()
    }

    /// `(tag, timeout)` of every acquisition.
    pub fn acquired_timeouts(&self) -> Vec<(String, Duration)> {
        lock(&self.acquired).clone()
    }

    pub fn acquired_with_tag(&self, tag: &str) -> usize {
        lock(&self.acquired).iter().filter(|(t, _)| t == tag).count()
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl WakeLock for FakeWakeLock {
    fn acquire(&self, tag: &str, timeout: Duration) -> CapabilityResult<WakeLockId> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CapabilityError::unavailable("wake lock"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.held).insert(id);
        lock(&self.acquired).push((tag.to_string(), timeout));
        Ok(id)
    }

    fn release(&self, id: WakeLockId) -> CapabilityResult<()> {
        if !lock(&self.held).remove(&id) {
            return Err(CapabilityError::failed("wake lock", format!("lock {id} not held")));
        }
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAudioFocus {
    requests: AtomicUsize,
    abandons: AtomicUsize,
}

impl FakeAudioFocus {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn abandons(&self) -> usize {
        self.abandons.load(Ordering::SeqCst)
    }
}

impl AudioFocus for FakeAudioFocus {
    fn request(&self, _stream: AudioStream) -> CapabilityResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn abandon(&self) -> CapabilityResult<()> {
        self.abandons.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotificationPoster {
    posted: Mutex<Vec<(Instant, Notification)>>,
    cancelled: Mutex<Vec<(Instant, i32)>>,
    showing: Mutex<BTreeSet<i32>>,
}

impl FakeNotificationPoster {
    pub fn posted(&self) -> Vec<Notification> {
        lock(&self.posted).iter().map(|(_, n)| n.clone()).collect()
    }

    pub fn posted_at(&self) -> Vec<Instant> {
        lock(&self.posted).iter().map(|(at, _)| *at).collect()
    }

    pub fn cancelled(&self) -> Vec<i32> {
        lock(&self.cancelled).iter().map(|(_, id)| *id).collect()
    }

    /// Notifications posted and not yet cancelled.
    pub fn showing(&self) -> Vec<i32> {
        lock(&self.showing).iter().copied().collect()
    }
}

impl NotificationPoster for FakeNotificationPoster {
    fn post(&self, notification: &Notification) -> CapabilityResult<()> {
        lock(&self.posted).push((Instant::now(), notification.clone()));
        // Auto-dismissing notifications never stay in the tray.
        if notification.timeout.is_none() {
            lock(&self.showing).insert(notification.id);
        }
        Ok(())
    }

    fn cancel(&self, id: i32) -> CapabilityResult<()> {
        lock(&self.cancelled).push((Instant::now(), id));
        lock(&self.showing).remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAlarmScheduler {
    scheduled: Mutex<Vec<(Instant, i32)>>,
    cancel_alls: AtomicUsize,
}

impl FakeAlarmScheduler {
    pub fn scheduled(&self) -> Vec<(Instant, i32)> {
        lock(&self.scheduled).clone()
    }

    pub fn cancel_alls(&self) -> usize {
        self.cancel_alls.load(Ordering::SeqCst)
    }
}

impl AlarmScheduler for FakeAlarmScheduler {
    fn schedule(&self, id: i32, _delay: Duration) -> CapabilityResult<()> {
        lock(&self.scheduled).push((Instant::now(), id));
        Ok(())
    }

    fn cancel_all(&self) -> CapabilityResult<()> {
        self.cancel_alls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
