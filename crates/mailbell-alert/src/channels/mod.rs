//! The five independent alert delivery channels.
//!
//! Each channel is one task running its own loop against the shared
//! [`AlertSession`]. A channel never ends the session and never affects the
//! other channels: capability failures are logged, counted in the
//! [`ChannelReport`] and either skip a cycle or end only that channel.

use std::sync::Arc;
use std::time::Duration;

use crate::capability::{Capabilities, ToneSource};
use crate::guard::PersistenceGuard;
use crate::session::AlertSession;

pub mod audio;
pub mod companion;
pub mod scheduled;
pub mod urgent;
pub mod vibration;

/// Identifies a delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKind {
    /// Direct vibration pulses
    Vibration,
    /// Full-screen, lock-screen-visible notification
    UrgentNotification,
    /// System wake alarms with a pulse alongside each
    ScheduledAlarm,
    /// Auto-dismissing notifications mirrored to a wearable
    Companion,
    /// Looped alarm tone
    Audio,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 5] = [
        ChannelKind::Vibration,
        ChannelKind::UrgentNotification,
        ChannelKind::ScheduledAlarm,
        ChannelKind::Companion,
        ChannelKind::Audio,
    ];
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vibration => write!(f, "vibration"),
            Self::UrgentNotification => write!(f, "urgent"),
            Self::ScheduledAlarm => write!(f, "alarm"),
            Self::Companion => write!(f, "companion"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Cadence of every channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTimings {
    /// Motor on-time of a direct vibration pulse
    pub vibration_pulse: Duration,
    /// Pause between direct vibration pulses
    pub vibration_gap: Duration,
    /// Vibration cycles per fresh pulse wake lock
    pub wake_refresh_cycles: u32,
    /// Timeout of each pulse wake lock
    pub pulse_wake_timeout: Duration,
    /// On/off step of the urgent notification's vibration pattern
    pub urgent_pattern_on: Duration,
    pub urgent_pattern_off: Duration,
    /// Retry interval when posting the urgent notification fails
    pub urgent_retry: Duration,
    /// Spacing of scheduled wake alarms
    pub alarm_interval: Duration,
    /// Pulse fired alongside each wake alarm
    pub alarm_pulse: Duration,
    /// Spacing of companion notifications
    pub companion_interval: Duration,
    /// Auto-dismiss timeout of each companion notification
    pub companion_timeout: Duration,
    /// Playback state check interval of the audio channel
    pub audio_check_interval: Duration,
}

impl Default for ChannelTimings {
    fn default() -> Self {
        Self {
            vibration_pulse: Duration::from_millis(180),
            vibration_gap: Duration::from_millis(20),
            wake_refresh_cycles: 2,
            pulse_wake_timeout: Duration::from_secs(1),
            urgent_pattern_on: Duration::from_millis(500),
            urgent_pattern_off: Duration::from_millis(200),
            urgent_retry: Duration::from_secs(1),
            alarm_interval: Duration::from_millis(500),
            alarm_pulse: Duration::from_millis(200),
            companion_interval: Duration::from_secs(3),
            companion_timeout: Duration::from_millis(2500),
            audio_check_interval: Duration::from_secs(5),
        }
    }
}

/// Everything a channel task needs.
#[derive(Clone)]
pub struct ChannelContext {
    pub session: Arc<AlertSession>,
    pub caps: Capabilities,
    pub guard: PersistenceGuard,
    pub timings: Arc<ChannelTimings>,
    pub tone: ToneSource,
}

/// What a channel did before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub channel: ChannelKind,
    /// Completed cycles
    pub cycles: u32,
    /// Cycles skipped because a capability call failed
    pub failures: u32,
    /// The channel gave up because a capability is unavailable
    pub aborted: bool,
}

impl ChannelReport {
    pub fn new(channel: ChannelKind) -> Self {
        Self {
            channel,
            cycles: 0,
            failures: 0,
            aborted: false,
        }
    }
}

/// Run the channel `kind` until the session stops.
pub async fn run(kind: ChannelKind, ctx: ChannelContext) -> ChannelReport {
    match kind {
        ChannelKind::Vibration => vibration::run(ctx).await,
        ChannelKind::UrgentNotification => urgent::run(ctx).await,
        ChannelKind::ScheduledAlarm => scheduled::run(ctx).await,
        ChannelKind::Companion => companion::run(ctx).await,
        ChannelKind::Audio => audio::run(ctx).await,
    }
}
