//! End-to-end ingestion tests: a wiremock alert server, the real HTTP source,
//! the supervisor and an alert dispatcher backed by recording fakes.

use std::sync::Arc;
use std::time::Duration;

use mailbell_alert::testing::FakePlatform;
use mailbell_alert::{AlertActuator, AlertDispatcher};
use mailbell_core::{
    AlertConfig, ConnectionState, ConnectionStatus, MailbellConfig, UiHandle, UiUpdate, WorkerKind,
};
use mailbell_ingest::IngestSupervisor;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INVOICE: &str = r#"{"subject":"Invoice","from":"billing@x.com","timestamp":1000}"#;

struct Harness {
    platform: FakePlatform,
    dispatcher: Arc<AlertDispatcher>,
    supervisor: IngestSupervisor,
}

fn harness(config: MailbellConfig, ui: UiHandle) -> Harness {
    let platform = FakePlatform::new();
    let actuator = AlertActuator::new(
        platform.capabilities(),
        AlertConfig::default().with_duration_secs(10),
    )
    .unwrap();
    let dispatcher = Arc::new(AlertDispatcher::new(actuator));
    let supervisor = IngestSupervisor::new(
        &config,
        Arc::new(ConnectionState::new()),
        dispatcher.clone(),
        platform.guard(true),
        ui,
    );
    Harness {
        platform,
        dispatcher,
        supervisor,
    }
}

fn stream_only() -> MailbellConfig {
    let mut config = MailbellConfig::default();
    config.ingest.poll_enabled = false;
    config
}

fn poll_only() -> MailbellConfig {
    let mut config = MailbellConfig::default();
    config.ingest.stream_enabled = false;
    config.ingest.poll_interval_secs = 1;
    config
}

fn sse(events: &[&str]) -> ResponseTemplate {
    let body: String = events.iter().map(|e| format!("data: {e}\n\n")).collect();
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}

async fn event_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/events")
        .count()
}

#[tokio::test]
async fn test_stream_event_reaches_dispatcher() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(sse(&[INVOICE]))
        .mount(&server)
        .await;

    let h = harness(stream_only(), UiHandle::detached());
    h.supervisor.connect(&server.uri()).unwrap();

    assert!(wait_until(Duration::from_secs(3), || h.dispatcher.count() == 1).await);
    assert_eq!(h.dispatcher.log()[0].summary(), "Invoice / billing@x.com");
    assert!(h.dispatcher.actuator().is_alerting());
    assert_eq!(h.platform.notifications.posted()[0].title, "Invoice");

    h.supervisor.disconnect();
}

#[tokio::test]
async fn test_stream_reconnects_after_server_closes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(sse(&[INVOICE]))
        .mount(&server)
        .await;

    let h = harness(stream_only(), UiHandle::detached());
    h.supervisor.connect(&server.uri()).unwrap();

    let start = tokio::time::Instant::now();
    let mut reconnected = false;
    while start.elapsed() < Duration::from_secs(5) {
        if event_requests(&server).await >= 2 {
            reconnected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(reconnected, "stream worker should reconnect within 5 s");

    // The replayed event is not delivered a second time.
    assert_eq!(h.dispatcher.count(), 1);
    h.supervisor.disconnect();
}

#[tokio::test]
async fn test_malformed_stream_lines_are_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(sse(&["{broken", r#"{"subject":"ok","from":"a","timestamp":5}"#]))
        .mount(&server)
        .await;

    let h = harness(stream_only(), UiHandle::detached());
    h.supervisor.connect(&server.uri()).unwrap();

    assert!(wait_until(Duration::from_secs(3), || h.dispatcher.count() == 1).await);
    assert_eq!(h.dispatcher.log()[0].subject, "ok");
    assert!(h.supervisor.is_alive(WorkerKind::Stream));
    h.supervisor.disconnect();
}

#[tokio::test]
async fn test_poll_duplicate_timestamps_dispatch_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "alerts": [
                {"subject": "Invoice", "from": "billing@x.com", "timestamp": 7},
                {"subject": "Invoice", "from": "billing@x.com", "timestamp": 7}
            ]
        })))
        .mount(&server)
        .await;

    let h = harness(poll_only(), UiHandle::detached());
    h.supervisor.connect(&server.uri()).unwrap();

    // Let at least two polls return the same pair.
    assert!(wait_until(Duration::from_secs(4), || {
        h.dispatcher.count() >= 1 && h.platform.wake_lock.acquired_with_tag("mailbell:poll") >= 2
    })
    .await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.dispatcher.count(), 1);

    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| r.url.query_pairs().any(|(key, _)| key == "since")));
    h.supervisor.disconnect();
}

#[tokio::test]
async fn test_poll_without_alerts_forwards_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let h = harness(poll_only(), UiHandle::detached());
    h.supervisor.connect(&server.uri()).unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        h.platform.wake_lock.acquired_with_tag("mailbell:poll") >= 2
    })
    .await);
    assert_eq!(h.dispatcher.count(), 0);
    h.supervisor.disconnect();
}

#[tokio::test]
async fn test_poll_http_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/poll"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let (ui, mut rx) = UiHandle::channel(64);
    let h = harness(poll_only(), ui);
    h.supervisor.connect(&server.uri()).unwrap();

    let status = tokio::time::timeout(Duration::from_secs(3), async {
        while let Some(update) = rx.recv().await {
            if let UiUpdate::Status {
                worker: WorkerKind::Poll,
                status,
            } = update
            {
                return Some(status);
            }
        }
        None
    })
    .await
    .unwrap();

    assert_eq!(status, Some(ConnectionStatus::HttpStatus(503)));
    assert!(h.supervisor.is_alive(WorkerKind::Poll));
    h.supervisor.disconnect();
}

#[tokio::test]
async fn test_same_alert_on_both_transports_dispatches_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(sse(&[INVOICE]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(r#"{{"alerts":[{INVOICE}]}}"#)))
        .mount(&server)
        .await;

    let mut config = MailbellConfig::default();
    config.ingest.poll_interval_secs = 1;
    let h = harness(config, UiHandle::detached());
    h.supervisor.connect(&server.uri()).unwrap();

    assert!(wait_until(Duration::from_secs(3), || h.dispatcher.count() == 1).await);
    assert!(wait_until(Duration::from_secs(3), || {
        h.platform.wake_lock.acquired_with_tag("mailbell:poll") >= 2
    })
    .await);
    assert_eq!(h.dispatcher.count(), 1);
    h.supervisor.disconnect();
}

#[tokio::test]
async fn test_without_cross_transport_dedup_each_transport_delivers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(sse(&[INVOICE]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(r#"{{"alerts":[{INVOICE}]}}"#)))
        .mount(&server)
        .await;

    let mut config = MailbellConfig::default();
    config.ingest.poll_interval_secs = 1;
    config.ingest.cross_transport_dedup = false;
    let h = harness(config, UiHandle::detached());
    h.supervisor.connect(&server.uri()).unwrap();

    assert!(wait_until(Duration::from_secs(3), || h.dispatcher.count() == 2).await);
    // One session, extended by the second delivery.
    assert!(h.dispatcher.actuator().is_alerting());
    h.supervisor.disconnect();
}

#[tokio::test]
async fn test_disconnect_stops_polling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"alerts": []})))
        .mount(&server)
        .await;

    let h = harness(poll_only(), UiHandle::detached());
    h.supervisor.connect(&server.uri()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        h.platform.wake_lock.acquired_with_tag("mailbell:poll") >= 1
    })
    .await);

    assert!(h.supervisor.disconnect());
    tokio::time::sleep(Duration::from_millis(100)).await;
    let before = server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), before);
    assert!(!h.supervisor.is_alive(WorkerKind::Poll));
}

#[tokio::test]
async fn test_unreachable_server_reports_status() {
    let (ui, mut rx) = UiHandle::channel(64);
    let h = harness(stream_only(), ui);
    // Nothing listens on port 9 of localhost.
    h.supervisor.connect("http://127.0.0.1:9").unwrap();

    let status = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(update) = rx.recv().await {
            if let UiUpdate::Status { status, .. } = update {
                if !matches!(status, ConnectionStatus::Connecting) {
                    return Some(status);
                }
            }
        }
        None
    })
    .await
    .unwrap();

    assert_eq!(status, Some(ConnectionStatus::Unreachable));
    h.supervisor.disconnect();
}
