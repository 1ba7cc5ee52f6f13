//! Companion-device burst: short-lived notifications that a paired wearable
//! mirrors and buzzes for.

use mailbell_core::log_channel_event;
use tracing::{debug, warn};

use super::{ChannelContext, ChannelKind, ChannelReport};
use crate::capability::{Notification, NotificationPriority};

/// First notification id of the burst.
pub const COMPANION_ID_BASE: i32 = 2000;

/// Ids cycle through this many values.
pub const COMPANION_ID_SPAN: u32 = 1000;

pub async fn run(ctx: ChannelContext) -> ChannelReport {
    let mut report = ChannelReport::new(ChannelKind::Companion);
    let mut sequence: u32 = 0;

    while ctx.session.should_continue() {
        let text = ctx.session.text();
        // A new id each time, or the wearable treats it as an update and stays quiet.
        let id = COMPANION_ID_BASE + (sequence % COMPANION_ID_SPAN) as i32;
        let notification = Notification::new(id, &text.title, &text.message)
            .with_priority(NotificationPriority::High)
            .with_timeout(ctx.timings.companion_timeout);

        match ctx.caps.notifications.post(&notification) {
            Ok(()) => {}
            Err(e) if e.is_unavailable() => {
                warn!(session_id = %ctx.session.id(), error = %e, "companion channel aborted");
                report.aborted = true;
                break;
            }
            Err(e) => {
                debug!(error = %e, id, "companion notification failed");
                report.failures += 1;
            }
        }
        sequence = sequence.wrapping_add(1);
        report.cycles += 1;

        if !ctx.session.pause(ctx.timings.companion_interval).await {
            break;
        }
    }

    log_channel_event!(ChannelKind::Companion, "stopped", cycles = report.cycles);
    report
}
