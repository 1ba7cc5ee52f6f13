//! Direct vibration: short pulses for the whole session.

use mailbell_core::log_channel_event;
use tracing::{debug, warn};

use super::{ChannelContext, ChannelKind, ChannelReport};
use crate::guard::WakeHold;

pub async fn run(ctx: ChannelContext) -> ChannelReport {
    let mut report = ChannelReport::new(ChannelKind::Vibration);
    let timings = &ctx.timings;
    let cycle = timings.vibration_pulse + timings.vibration_gap;
    let refresh_every = timings.wake_refresh_cycles.max(1);
    let mut pulse_hold: Option<WakeHold> = None;

    while ctx.session.should_continue() {
        if report.cycles % refresh_every == 0 {
            // The new lock is taken before the old one is released.
            pulse_hold = Some(ctx.guard.hold_for_pulse(timings.pulse_wake_timeout));
        }

        match ctx.caps.vibrator.vibrate(timings.vibration_pulse) {
            Ok(()) => {}
            Err(e) if e.is_unavailable() => {
                warn!(session_id = %ctx.session.id(), error = %e, "vibration channel aborted");
                report.aborted = true;
                break;
            }
            Err(e) => {
                debug!(error = %e, cycle = report.cycles, "vibration pulse failed");
                report.failures += 1;
            }
        }
        report.cycles += 1;

        if !ctx.session.pause(cycle).await {
            break;
        }
    }

    drop(pulse_hold);
    if let Err(e) = ctx.caps.vibrator.cancel() {
        debug!(error = %e, "vibrator cancel failed");
    }

    log_channel_event!(
        ChannelKind::Vibration,
        "stopped",
        cycles = report.cycles,
        failures = report.failures
    );
    report
}
