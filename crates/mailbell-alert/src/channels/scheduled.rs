//! Scheduled-alarm vibration fallback.
//!
//! Wake alarms are scheduled ahead for the whole session so the device is
//! woken even if this process gets frozen; while the process runs, a pulse is
//! fired alongside each alarm slot. Alarms past an extended deadline are
//! scheduled as the deadline moves.

use tokio::time::Instant;

use mailbell_core::log_channel_event;
use tracing::{debug, warn};

use super::{ChannelContext, ChannelKind, ChannelReport};

/// First request code used for scheduled alarms.
pub const ALARM_ID_BASE: i32 = 1000;

pub async fn run(ctx: ChannelContext) -> ChannelReport {
    let mut report = ChannelReport::new(ChannelKind::ScheduledAlarm);
    let interval = ctx.timings.alarm_interval;
    let mut alarms_available = true;
    let mut vibrator_available = true;
    let mut next_id = ALARM_ID_BASE;
    let mut scheduled_until = Instant::now();

    while ctx.session.should_continue() {
        if alarms_available {
            let deadline = ctx.session.deadline();
            while scheduled_until + interval <= deadline {
                scheduled_until += interval;
                let delay = scheduled_until.saturating_duration_since(Instant::now());
                match ctx.caps.alarms.schedule(next_id, delay) {
                    Ok(()) => next_id = next_id.wrapping_add(1),
                    Err(e) if e.is_unavailable() => {
                        warn!(error = %e, "wake alarms unavailable, pulses only");
                        alarms_available = false;
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "wake alarm schedule failed");
                        report.failures += 1;
                    }
                }
            }
        }

        if vibrator_available {
            match ctx.caps.vibrator.vibrate(ctx.timings.alarm_pulse) {
                Ok(()) => {}
                Err(e) if e.is_unavailable() => {
                    debug!(error = %e, "alarm pulses unavailable, alarms only");
                    vibrator_available = false;
                }
                Err(e) => {
                    debug!(error = %e, "alarm pulse failed");
                    report.failures += 1;
                }
            }
        }

        if !alarms_available && !vibrator_available {
            warn!(session_id = %ctx.session.id(), "scheduled alarm channel aborted");
            report.aborted = true;
            break;
        }
        report.cycles += 1;

        if !ctx.session.pause(interval).await {
            break;
        }
    }

    if let Err(e) = ctx.caps.alarms.cancel_all() {
        debug!(error = %e, "wake alarm cancel failed");
    }

    log_channel_event!(
        ChannelKind::ScheduledAlarm,
        "stopped",
        cycles = report.cycles,
        alarms = next_id.wrapping_sub(ALARM_ID_BASE)
    );
    report
}
