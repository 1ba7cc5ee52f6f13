//! Integration tests for the alert actuator against the recording fakes.
//!
//! All tests run on a paused clock, so durations below are exact.

use std::time::Duration;

use mailbell_alert::channels::urgent::URGENT_NOTIFICATION_ID;
use mailbell_alert::testing::FakePlatform;
use mailbell_alert::{AlertActuator, ChannelKind, TriggerOutcome};
use mailbell_core::{AlertConfig, UiHandle, UiUpdate};
use tokio::time::Instant;

fn actuator(platform: &FakePlatform, duration_secs: u64) -> AlertActuator {
    AlertActuator::new(
        platform.capabilities(),
        AlertConfig::default().with_duration_secs(duration_secs),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_trigger_starts_five_channels_and_returns_immediately() {
    let platform = FakePlatform::new();
    let actuator = actuator(&platform, 10);
    let start = Instant::now();

    let outcome = actuator.trigger("Invoice", "billing@x.com");

    assert!(matches!(outcome, TriggerOutcome::Started { channels: 5, .. }));
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert!(actuator.is_alerting());
    assert!(actuator.last_summary().is_none());

    actuator.wait_idle().await;
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    assert!(!actuator.is_alerting());

    let summary = actuator.last_summary().unwrap();
    assert_eq!(summary.session_id, outcome.session_id());
    assert!(!summary.cancelled);
    let channels: Vec<ChannelKind> = summary.reports.iter().map(|r| r.channel).collect();
    assert_eq!(channels, ChannelKind::ALL.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_ten_second_alert_audio_loop_runs_twice() {
    let platform = FakePlatform::new();
    let actuator = actuator(&platform, 10);

    actuator.trigger("Invoice", "billing@x.com");
    actuator.wait_idle().await;

    let summary = actuator.last_summary().unwrap();
    assert_eq!(summary.report(ChannelKind::Audio).unwrap().cycles, 2);
    assert_eq!(platform.audio.checks(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_vibrator_leaves_other_channels_running() {
    let platform = FakePlatform::new();
    platform.vibrator.set_unavailable(true);
    let actuator = actuator(&platform, 10);

    let outcome = actuator.trigger("Invoice", "billing@x.com");
    assert!(matches!(outcome, TriggerOutcome::Started { channels: 5, .. }));

    actuator.wait_idle().await;
    let summary = actuator.last_summary().unwrap();
    assert!(!summary.cancelled);

    let vibration = summary.report(ChannelKind::Vibration).unwrap();
    assert!(vibration.aborted);

    let urgent = summary.report(ChannelKind::UrgentNotification).unwrap();
    assert!(!urgent.aborted);
    assert_eq!(urgent.cycles, 1);

    let alarm = summary.report(ChannelKind::ScheduledAlarm).unwrap();
    assert!(!alarm.aborted);
    assert_eq!(alarm.cycles, 20);

    let companion = summary.report(ChannelKind::Companion).unwrap();
    assert!(!companion.aborted);
    assert_eq!(companion.cycles, 4);

    let audio = summary.report(ChannelKind::Audio).unwrap();
    assert!(!audio.aborted);
    assert_eq!(audio.cycles, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_every_channel_promptly() {
    let platform = FakePlatform::new();
    let actuator = actuator(&platform, 60);

    actuator.trigger("Invoice", "billing@x.com");
    tokio::time::sleep(Duration::from_millis(7_050)).await;

    let cancelled_at = Instant::now();
    assert!(actuator.cancel());
    assert!(!actuator.is_alerting());
    assert!(!actuator.cancel());

    actuator.wait_idle().await;
    assert!(cancelled_at.elapsed() <= Duration::from_millis(200));

    let summary = actuator.last_summary().unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.reports.len(), 5);

    // Nothing fires after the cancel.
    assert!(platform.vibrator.pulses().iter().all(|(at, _)| *at <= cancelled_at));
    assert!(platform.notifications.posted_at().iter().all(|at| *at <= cancelled_at));

    let stops = platform.audio.stops();
    assert_eq!(stops.len(), 1);
    assert!(stops[0] - cancelled_at <= Duration::from_secs(5));

    assert!(platform.notifications.showing().is_empty());
    assert_eq!(platform.vibrator.cancels(), 1);
    assert_eq!(platform.alarms.cancel_alls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_locks_released_after_session() {
    let platform = FakePlatform::new();
    let actuator = actuator(&platform, 10);

    actuator.trigger("Invoice", "billing@x.com");
    tokio::task::yield_now().await;
    assert!(platform.wake_lock.held() >= 1);

    actuator.wait_idle().await;
    assert_eq!(platform.wake_lock.held(), 0);
    assert_eq!(
        platform.wake_lock.acquired_timeouts()[0],
        ("mailbell:alert".to_string(), Duration::from_secs(20))
    );
    assert_eq!(platform.audio_focus.requests(), 1);
    assert_eq!(platform.audio_focus.abandons(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_persistence_off_takes_no_wake_locks() {
    let platform = FakePlatform::new();
    let actuator = AlertActuator::new(
        platform.capabilities(),
        AlertConfig::default()
            .with_duration_secs(10)
            .with_background_persistence(false),
    )
    .unwrap();

    actuator.trigger("Invoice", "billing@x.com");
    actuator.wait_idle().await;

    assert!(platform.wake_lock.acquired_timeouts().is_empty());
    assert_eq!(platform.audio_focus.requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_during_session_extends_it() {
    let platform = FakePlatform::new();
    let actuator = actuator(&platform, 10);
    let start = Instant::now();

    let first = actuator.trigger("Invoice", "billing@x.com");
    tokio::time::sleep(Duration::from_secs(6)).await;
    let second = actuator.trigger("Reminder", "boss@x.com");

    assert_eq!(
        second,
        TriggerOutcome::Extended {
            session_id: first.session_id().to_string()
        }
    );

    let urgent: Vec<String> = platform
        .notifications
        .posted()
        .into_iter()
        .filter(|n| n.id == URGENT_NOTIFICATION_ID)
        .map(|n| n.title)
        .collect();
    assert_eq!(urgent, vec!["Invoice", "Reminder"]);

    actuator.wait_idle().await;
    assert_eq!(start.elapsed(), Duration::from_secs(16));

    let summary = actuator.last_summary().unwrap();
    assert_eq!(summary.reports.len(), 5);
    assert_eq!(platform.audio.started().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_after_end_starts_new_session() {
    let platform = FakePlatform::new();
    let (ui, mut rx) = UiHandle::channel(8);
    let actuator = actuator(&platform, 10).with_ui(ui);

    let first = actuator.trigger("Invoice", "billing@x.com");
    actuator.wait_idle().await;

    match rx.try_recv().unwrap() {
        UiUpdate::SessionEnded { session_id } => assert_eq!(session_id, first.session_id()),
        other => panic!("unexpected update: {other:?}"),
    }

    let second = actuator.trigger("Reminder", "boss@x.com");
    assert!(matches!(second, TriggerOutcome::Started { .. }));
    assert_ne!(second.session_id(), first.session_id());
    actuator.wait_idle().await;
}

#[tokio::test(start_paused = true)]
async fn test_config_change_applies_to_next_session() {
    let platform = FakePlatform::new();
    let actuator = actuator(&platform, 10);

    actuator.trigger("Invoice", "billing@x.com");
    actuator.set_config(AlertConfig::default().with_duration_secs(20));
    let start = Instant::now();
    actuator.wait_idle().await;
    assert_eq!(start.elapsed(), Duration::from_secs(10));

    let start = Instant::now();
    actuator.trigger("Reminder", "boss@x.com");
    actuator.wait_idle().await;
    assert_eq!(start.elapsed(), Duration::from_secs(20));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_run_on_a_multi_thread_runtime() {
    let platform = FakePlatform::new();
    let actuator = actuator(&platform, 10);

    let spawned = actuator.clone();
    let outcome = tokio::spawn(async move { spawned.trigger("Invoice", "billing@x.com") })
        .await
        .unwrap();
    assert!(matches!(outcome, TriggerOutcome::Started { channels: 5, .. }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(actuator.cancel());

    tokio::time::timeout(Duration::from_secs(5), actuator.wait_idle())
        .await
        .expect("session should stop after cancel");

    // Idle means every channel has already cleaned up.
    let summary = actuator.last_summary().expect("summary stored before idle");
    assert_eq!(summary.session_id, outcome.session_id());
    assert_eq!(summary.reports.len(), 5);
    assert_eq!(platform.vibrator.cancels(), 1);
    assert_eq!(platform.alarms.cancel_alls(), 1);
    assert!(platform.notifications.cancelled().contains(&URGENT_NOTIFICATION_ID));
    assert_eq!(platform.wake_lock.held(), 0);
    assert!(!actuator.is_alerting());
}
