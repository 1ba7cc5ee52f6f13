//! Platform capabilities used to make an alert perceptible.
//!
//! Every handset concern sits behind its own trait so the actuator only
//! depends on these interfaces. The concrete set is chosen once at startup
//! ([`Capabilities::detect`]) and tests swap in the fakes from
//! [`crate::testing`].
//!
//! Calls are synchronous and short: platform bindings queue the request and
//! return. A call either succeeds, reports the capability as
//! [`CapabilityError::Unavailable`] (the channel using it gives up) or
//! reports a one-off [`CapabilityError::Failed`] (the channel skips the cycle).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mailbell_core::MailbellError;
use thiserror::Error;

/// Failure of a platform capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// The device does not offer this capability (no motor, permission denied).
    #[error("{capability} is not available")]
    Unavailable { capability: &'static str },

    /// A single call failed; later calls may succeed.
    #[error("{capability} failed: {message}")]
    Failed {
        capability: &'static str,
        message: String,
    },
}

impl CapabilityError {
    pub fn unavailable(capability: &'static str) -> Self {
        Self::Unavailable { capability }
    }

    pub fn failed(capability: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            capability,
            message: message.into(),
        }
    }

    /// Whether the channel using this capability should stop trying.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<CapabilityError> for MailbellError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Unavailable { capability } => MailbellError::CapabilityUnavailable {
                capability: capability.to_string(),
            },
            CapabilityError::Failed {
                capability,
                message,
            } => MailbellError::capability_failed(capability, message),
        }
    }
}

/// Result type for capability calls.
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

/// Vibration motor.
pub trait Vibrator: Send + Sync {
    /// Run the motor once for `duration`.
    fn vibrate(&self, duration: Duration) -> CapabilityResult<()>;

    /// Stop the motor immediately.
    fn cancel(&self) -> CapabilityResult<()>;
}

/// Audio stream a sound is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStream {
    /// The alarm stream; plays through silent mode and at alarm volume.
    Alarm,
    Notification,
}

/// Tone played by the audio channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToneSource {
    /// The tone shipped with the application
    Bundled,
    /// A user-selected audio file
    File(PathBuf),
}

impl ToneSource {
    /// Pick the user's ringtone when it exists on disk, the bundled tone otherwise.
    pub fn resolve(custom: Option<&Path>) -> Self {
        match custom {
            Some(path) if path.is_file() => Self::File(path.to_path_buf()),
            Some(path) => {
                tracing::warn!(path = %path.display(), "custom ringtone missing, using bundled tone");
                Self::Bundled
            }
            None => Self::Bundled,
        }
    }
}

impl std::fmt::Display for ToneSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bundled => write!(f, "bundled"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A looped playback request.
#[derive(Debug, Clone, PartialEq)]
pub struct Playback {
    pub tone: ToneSource,
    pub stream: AudioStream,
    /// 0.0..=1.0
    pub volume: f32,
    pub looping: bool,
}

impl Playback {
    /// Looped playback on the alarm stream at maximum volume.
    pub fn alarm_loop(tone: ToneSource) -> Self {
        Self {
            tone,
            stream: AudioStream::Alarm,
            volume: 1.0,
            looping: true,
        }
    }
}

/// Audio output.
pub trait AudioPlayer: Send + Sync {
    fn start(&self, playback: &Playback) -> CapabilityResult<()>;

    /// Whether the last started playback is still audible.
    fn is_playing(&self) -> bool;

    fn stop(&self) -> CapabilityResult<()>;
}

/// Identifier of an acquired wake lock.
pub type WakeLockId = u64;

/// Screen/CPU wake locks.
pub trait WakeLock: Send + Sync {
    /// Acquire a wake lock that the platform releases on its own after `timeout`.
    fn acquire(&self, tag: &str, timeout: Duration) -> CapabilityResult<WakeLockId>;

    fn release(&self, id: WakeLockId) -> CapabilityResult<()>;
}

/// Audio focus.
pub trait AudioFocus: Send + Sync {
    fn request(&self, stream: AudioStream) -> CapabilityResult<()>;

    fn abandon(&self) -> CapabilityResult<()>;
}

/// Notification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPriority {
    Default,
    High,
    Max,
}

/// A notification to post.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: i32,
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
    /// Shown in full on the lock screen
    pub lock_screen_visible: bool,
    /// Launches the app over the lock screen
    pub full_screen: bool,
    /// Tapping opens the app
    pub launch_app: bool,
    /// Alternating off/on durations, starting with an initial delay
    pub vibration_pattern: Vec<Duration>,
    /// Dismissed by the platform after this long
    pub timeout: Option<Duration>,
}

impl Notification {
    pub fn new(id: i32, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            body: body.into(),
            priority: NotificationPriority::Default,
            lock_screen_visible: false,
            full_screen: false,
            launch_app: false,
            vibration_pattern: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn urgent(mut self) -> Self {
        self.priority = NotificationPriority::Max;
        self.lock_screen_visible = true;
        self.full_screen = true;
        self.launch_app = true;
        self
    }

    pub fn with_vibration_pattern(mut self, pattern: Vec<Duration>) -> Self {
        self.vibration_pattern = pattern;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Notification tray.
pub trait NotificationPoster: Send + Sync {
    /// Post or replace the notification with `notification.id`.
    fn post(&self, notification: &Notification) -> CapabilityResult<()>;

    fn cancel(&self, id: i32) -> CapabilityResult<()>;
}

/// System wake alarms.
pub trait AlarmScheduler: Send + Sync {
    /// Schedule an exact, device-waking alarm `delay` from now.
    fn schedule(&self, id: i32, delay: Duration) -> CapabilityResult<()>;

    /// Cancel every alarm this application scheduled.
    fn cancel_all(&self) -> CapabilityResult<()>;
}

/// The capability set chosen at startup.
#[derive(Clone)]
pub struct Capabilities {
    pub vibrator: Arc<dyn Vibrator>,
    pub audio: Arc<dyn AudioPlayer>,
    pub wake_lock: Arc<dyn WakeLock>,
    pub audio_focus: Arc<dyn AudioFocus>,
    pub notifications: Arc<dyn NotificationPoster>,
    pub alarms: Arc<dyn AlarmScheduler>,
}

impl Capabilities {
    /// Capabilities of the machine mailbell runs on.
    ///
    /// Only the console platform exists on desktop targets.
    pub fn detect() -> Self {
        crate::console::console_capabilities()
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_tone_resolution() {
        assert_eq!(ToneSource::resolve(None), ToneSource::Bundled);
        assert_eq!(
            ToneSource::resolve(Some(Path::new("/definitely/not/here.ogg"))),
            ToneSource::Bundled
        );

        let file = NamedTempFile::new().unwrap();
        assert_eq!(
            ToneSource::resolve(Some(file.path())),
            ToneSource::File(file.path().to_path_buf())
        );
    }

    #[test]
    fn test_capability_error_conversion() {
        let err: MailbellError = CapabilityError::unavailable("vibrator").into();
        assert!(err.is_capability_error());

        let err = CapabilityError::failed("audio", "device busy");
        assert!(!err.is_unavailable());
        assert_eq!(err.to_string(), "audio failed: device busy");
    }

    #[test]
    fn test_urgent_notification() {
        let n = Notification::new(1, "Invoice", "billing@x.com").urgent();
        assert_eq!(n.priority, NotificationPriority::Max);
        assert!(n.lock_screen_visible && n.full_screen && n.launch_app);
    }
}
