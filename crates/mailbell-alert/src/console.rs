//! Console platform: desktop stand-ins for the handset capabilities.
//!
//! Audio rings the terminal bell in a loop; vibration, notifications and
//! alarms are written to the log; wake locks and audio focus always succeed
//! and do nothing.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capability::{
    AlarmScheduler, AudioFocus, AudioPlayer, AudioStream, Capabilities, CapabilityError,
    CapabilityResult, Notification, NotificationPoster, Playback, Vibrator, WakeLock, WakeLockId,
};

/// Time between terminal bells while "playing".
pub const BELL_INTERVAL: Duration = Duration::from_secs(1);

pub fn console_capabilities() -> Capabilities {
    Capabilities {
        vibrator: Arc::new(ConsoleVibrator),
        audio: Arc::new(TerminalBell::default()),
        wake_lock: Arc::new(NoopWakeLock::default()),
        audio_focus: Arc::new(NoopAudioFocus),
        notifications: Arc::new(LogNotifications),
        alarms: Arc::new(LogAlarms),
    }
}

/// Ring the terminal bell (BEL, 0x07) once.
pub fn ring_bell() {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(b"\x07");
    let _ = stdout.flush();
}

pub struct ConsoleVibrator;

impl Vibrator for ConsoleVibrator {
    fn vibrate(&self, duration: Duration) -> CapabilityResult<()> {
        debug!(duration_ms = duration.as_millis() as u64, "bzz");
        Ok(())
    }

    fn cancel(&self) -> CapabilityResult<()> {
        Ok(())
    }
}

/// Looped "playback" through the terminal bell.
#[derive(Default)]
pub struct TerminalBell {
    playing: Mutex<Option<CancellationToken>>,
}

impl AudioPlayer for TerminalBell {
    fn start(&self, playback: &Playback) -> CapabilityResult<()> {
        let runtime =
            Handle::try_current().map_err(|e| CapabilityError::failed("audio", e.to_string()))?;
        let token = CancellationToken::new();
        let mut playing = self.playing.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = playing.replace(token.clone()) {
            previous.cancel();
        }

        info!(tone = %playback.tone, looping = playback.looping, "terminal bell started");
        let looping = playback.looping;
        runtime.spawn(async move {
            loop {
                ring_bell();
                if !looping {
                    break;
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(BELL_INTERVAL) => {}
                }
            }
        });
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
            .lock()
            .map(|playing| playing.as_ref().is_some_and(|t| !t.is_cancelled()))
            .unwrap_or(false)
    }

    fn stop(&self) -> CapabilityResult<()> {
        if let Some(token) = self.playing.lock().unwrap_or_else(|p| p.into_inner()).take() {
            token.cancel();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopWakeLock {
    next_id: AtomicU64,
}

impl WakeLock for NoopWakeLock {
    fn acquire(&self, _tag: &str, _timeout: Duration) -> CapabilityResult<WakeLockId> {
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn release(&self, _id: WakeLockId) -> CapabilityResult<()> {
        Ok(())
    }
}

pub struct NoopAudioFocus;

impl AudioFocus for NoopAudioFocus {
    fn request(&self, _stream: AudioStream) -> CapabilityResult<()> {
        Ok(())
    }

    fn abandon(&self) -> CapabilityResult<()> {
        Ok(())
    }
}

pub struct LogNotifications;

impl NotificationPoster for LogNotifications {
    fn post(&self, notification: &Notification) -> CapabilityResult<()> {
        info!(
            id = notification.id,
            title = %notification.title,
            body = %notification.body,
            priority = ?notification.priority,
            "notification"
        );
        Ok(())
    }

    fn cancel(&self, id: i32) -> CapabilityResult<()> {
        debug!(id, "notification withdrawn");
        Ok(())
    }
}

pub struct LogAlarms;

impl AlarmScheduler for LogAlarms {
    fn schedule(&self, id: i32, delay: Duration) -> CapabilityResult<()> {
        debug!(id, delay_ms = delay.as_millis() as u64, "wake alarm scheduled");
        Ok(())
    }

    fn cancel_all(&self) -> CapabilityResult<()> {
        debug!("wake alarms cancelled");
        Ok(())
    }
}
