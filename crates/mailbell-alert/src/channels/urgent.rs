//! Urgent full-screen notification, posted for the duration of the session.

use std::time::Duration;

use mailbell_core::log_channel_event;
use tracing::{debug, warn};

use super::{ChannelContext, ChannelKind, ChannelReport, ChannelTimings};
use crate::capability::{CapabilityResult, Notification, NotificationPoster};
use crate::session::AlertText;

/// Notification id of the urgent notification; re-posting replaces it.
pub const URGENT_NOTIFICATION_ID: i32 = 1;

/// Vibration pattern covering `duration`: an initial zero delay followed by
/// on/off pairs.
pub fn vibration_pattern(duration: Duration, on: Duration, off: Duration) -> Vec<Duration> {
    let step = (on + off).as_millis().max(1);
    let pairs = (duration.as_millis() / step).max(1) as usize;
    let mut pattern = Vec::with_capacity(1 + pairs * 2);
    pattern.push(Duration::ZERO);
    for _ in 0..pairs {
        pattern.push(on);
        pattern.push(off);
    }
    pattern
}

/// The urgent notification for `text` ringing for `duration`.
pub fn notification(text: &AlertText, duration: Duration, timings: &ChannelTimings) -> Notification {
    Notification::new(URGENT_NOTIFICATION_ID, &text.title, &text.message)
        .urgent()
        .with_vibration_pattern(vibration_pattern(
            duration,
            timings.urgent_pattern_on,
            timings.urgent_pattern_off,
        ))
}

/// Post (or replace) the urgent notification.
pub fn post(
    poster: &dyn NotificationPoster,
    text: &AlertText,
    duration: Duration,
    timings: &ChannelTimings,
) -> CapabilityResult<()> {
    poster.post(&notification(text, duration, timings))
}

pub async fn run(ctx: ChannelContext) -> ChannelReport {
    let mut report = ChannelReport::new(ChannelKind::UrgentNotification);
    let poster = ctx.caps.notifications.as_ref();

    loop {
        let result = post(
            poster,
            &ctx.session.text(),
            ctx.session.duration(),
            &ctx.timings,
        );
        match result {
            Ok(()) => {
                report.cycles += 1;
                break;
            }
            Err(e) if e.is_unavailable() => {
                warn!(session_id = %ctx.session.id(), error = %e, "urgent notification channel aborted");
                report.aborted = true;
                return report;
            }
            Err(e) => {
                debug!(error = %e, "urgent notification post failed, retrying");
                report.failures += 1;
                if !ctx.session.pause(ctx.timings.urgent_retry).await {
                    break;
                }
            }
        }
    }

    if report.cycles > 0 {
        ctx.session.wait_for_deadline().await;
    }

    if let Err(e) = poster.cancel(URGENT_NOTIFICATION_ID) {
        debug!(error = %e, "urgent notification cancel failed");
    }

    log_channel_event!(ChannelKind::UrgentNotification, "withdrawn");
    report
}
