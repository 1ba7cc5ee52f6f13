//! Looped alarm audio.
//!
//! Plays the tone on the alarm stream at maximum volume and checks every
//! few seconds that it is still playing, restarting it if the platform
//! stopped it. Audio focus is held for exactly as long as this channel runs.

use mailbell_core::log_channel_event;
use tracing::{debug, info, warn};

use super::{ChannelContext, ChannelKind, ChannelReport};
use crate::capability::Playback;

pub async fn run(ctx: ChannelContext) -> ChannelReport {
    let mut report = ChannelReport::new(ChannelKind::Audio);
    let playback = Playback::alarm_loop(ctx.tone.clone());
    let focus = ctx.guard.request_audio_focus();
    let player = ctx.caps.audio.as_ref();

    match player.start(&playback) {
        Ok(()) => info!(session_id = %ctx.session.id(), tone = %ctx.tone, "alarm audio started"),
        Err(e) if e.is_unavailable() => {
            warn!(session_id = %ctx.session.id(), error = %e, "audio channel aborted");
            report.aborted = true;
            return report;
        }
        Err(e) => {
            debug!(error = %e, "alarm audio start failed, retrying at next check");
            report.failures += 1;
        }
    }

    while ctx.session.should_continue() {
        if !player.is_playing() {
            if let Err(e) = player.start(&playback) {
                debug!(error = %e, "alarm audio restart failed");
                report.failures += 1;
            }
        }
        report.cycles += 1;

        if !ctx.session.pause(ctx.timings.audio_check_interval).await {
            break;
        }
    }

    if let Err(e) = player.stop() {
        debug!(error = %e, "alarm audio stop failed");
    }
    drop(focus);

    log_channel_event!(ChannelKind::Audio, "stopped", iterations = report.cycles);
    report
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::capability::AudioStream;
    use crate::channels::test_support::context;
    use crate::testing::FakePlatform;

    #[tokio::test(start_paused = true)]
    async fn test_plays_alarm_stream_at_max_volume() {
        let platform = FakePlatform::new();
        run(context(&platform, Duration::from_secs(10))).await;

        let started = platform.audio.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].stream, AudioStream::Alarm);
        assert_eq!(started[0].volume, 1.0);
        assert!(started[0].looping);
        assert_eq!(platform.audio.stops().len(), 1);
        assert_eq!(platform.audio_focus.requests(), 1);
        assert_eq!(platform.audio_focus.abandons(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_second_alert_checks_twice() {
        let platform = FakePlatform::new();
        let report = run(context(&platform, Duration::from_secs(10))).await;

        assert_eq!(report.cycles, 2);
        assert_eq!(platform.audio.checks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_stopped_playback() {
        let platform = FakePlatform::new();
        let ctx = context(&platform, Duration::from_secs(10));
        let handle = tokio::spawn(run(ctx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        platform.audio.finish_playback();
        handle.await.unwrap();

        // Initial start plus the restart at the 5 s check.
        assert_eq!(platform.audio.started().len(), 2);
    }
}
