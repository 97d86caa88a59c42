use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use satellite_core::{HttpMessage, Outcome, ProxyRequest};
use satellite_debug::{
    DebugManager, DebugManagerError, DebugSession, DebugSessionState, SessionError,
    SessionSettings,
};
use satellite_larky_debugger::{
    wire::mock::{MockDebugServer, MockDebugServerConfig},
    Breakpoint, DebugServerAddr, EvaluationError, FnEvaluator, LarkyDebuggerConfig, Location,
    ScriptEvaluator, Stepping,
};
use satellite_larky_gateway::{
    mock::MockGateway,
    proto::{client_event, ClientEvent},
    CANCELLED_MESSAGE,
};
use tokio::sync::Notify;

struct Harness {
    server: MockDebugServer,
    gateway: MockGateway,
    manager: DebugManager,
    release: Arc<Notify>,
}

/// A manager whose evaluator echoes the message back once `release` is
/// notified.
async fn harness() -> Harness {
    harness_with(MockDebugServerConfig::default()).await
}

async fn harness_with(config: MockDebugServerConfig) -> Harness {
    let server = MockDebugServer::spawn_with_config(config).await.unwrap();
    let gateway = MockGateway::new();
    let release = Arc::new(Notify::new());
    let manager = DebugManager::with_transport(
        gateway.transport(),
        released_echo(release.clone()),
        settings(server.port()),
    );
    Harness {
        server,
        gateway,
        manager,
        release,
    }
}

fn settings(port: u16) -> SessionSettings {
    settings_with_grace(port, Duration::from_millis(50))
}

fn settings_with_grace(port: u16, stop_grace: Duration) -> SessionSettings {
    SessionSettings {
        debug_server: DebugServerAddr::new("127.0.0.1", port),
        debugger: LarkyDebuggerConfig {
            connect_attempts: 1,
            connect_backoff: Duration::from_millis(10),
            stop_grace,
            ..LarkyDebuggerConfig::default()
        },
    }
}

fn released_echo(release: Arc<Notify>) -> Arc<dyn ScriptEvaluator> {
    Arc::new(FnEvaluator::new(move |_: String, message: HttpMessage, _: u16| {
        let release = release.clone();
        async move {
            release.notified().await;
            Ok::<_, EvaluationError>(message)
        }
    }))
}

fn proxy_request() -> ProxyRequest {
    ProxyRequest {
        script: "def process(m): return m".to_string(),
        message: HttpMessage::new("http://x", "{}"),
    }
}

async fn wait_for_state(session: &DebugSession, expected: DebugSessionState) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while session.state() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(
        reached.is_ok(),
        "session stuck in {} waiting for {expected}",
        session.state()
    );
}

async fn started(session: &DebugSession) -> DebugSessionState {
    tokio::time::timeout(Duration::from_secs(5), session.wait_started())
        .await
        .expect("session did not leave INITIALIZING")
}

fn error_text(event: &ClientEvent) -> Option<&str> {
    match &event.payload {
        Some(client_event::Payload::Error(error)) => Some(error.message.as_str()),
        _ => None,
    }
}

#[tokio::test]
async fn proxy_request_runs_to_completion() {
    let h = harness().await;
    let session = h.manager.new_session("org-1", "tntabc").unwrap();
    assert_eq!(session.state(), DebugSessionState::Initializing);

    let events = h.gateway.wait_for_client_events(1).await;
    let Some(client_event::Payload::NewSession(announced)) = &events[0].payload else {
        panic!("expected new_session, got {:?}", events[0]);
    };
    assert_eq!(announced.session_id, session.id());
    assert_eq!(announced.org_id, "org-1");
    assert_eq!(announced.vault, "tntabc");

    h.gateway.send_proxy_request(proxy_request());
    assert_eq!(started(&session).await, DebugSessionState::Running);

    h.release.notify_one();
    wait_for_state(&session, DebugSessionState::Completed).await;

    let events = h.gateway.wait_for_client_events(2).await;
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[1],
        ClientEvent::result_ready(HttpMessage::new("http://x", "{}"))
    );
    assert_eq!(
        session.result().outcome(),
        Some(Outcome::Ready(HttpMessage::new("http://x", "{}")))
    );
}

#[tokio::test]
async fn stop_while_pending_reports_cancellation_once() {
    let h = harness().await;
    let session = h.manager.new_session("org-1", "tntabc").unwrap();
    h.gateway.send_proxy_request(proxy_request());
    assert_eq!(started(&session).await, DebugSessionState::Running);

    session.stop().await;
    assert_eq!(session.state(), DebugSessionState::Completed);
    let events = h.gateway.wait_for_client_events(2).await;
    assert_eq!(error_text(&events[1]), Some(CANCELLED_MESSAGE));

    session.stop().await;
    h.gateway.wait_for_outbound_closed().await;
    assert_eq!(h.gateway.client_events().len(), 2);
}

#[tokio::test]
async fn stop_before_the_proxy_request_cancels_the_session() {
    let h = harness().await;
    let session = h.manager.new_session("org-1", "tntabc").unwrap();
    h.gateway.wait_for_client_events(1).await;

    session.stop().await;

    let events = h.gateway.wait_for_client_events(2).await;
    assert_eq!(error_text(&events[1]), Some(CANCELLED_MESSAGE));
    assert_eq!(session.result().outcome(), Some(Outcome::Cancelled));
    assert_eq!(started(&session).await, DebugSessionState::Initializing);
}

#[tokio::test]
async fn debugger_operations_require_a_running_session() {
    let h = harness().await;
    let session = h.manager.new_session("org-1", "tntabc").unwrap();

    match session.threads() {
        Err(SessionError::NotRunning { state }) => {
            assert_eq!(state, DebugSessionState::Initializing)
        }
        other => panic!("expected NotRunning, got {other:?}"),
    }
    assert!(matches!(
        session.list_frames(1).await,
        Err(SessionError::NotRunning { .. })
    ));

    h.gateway.send_proxy_request(proxy_request());
    assert_eq!(started(&session).await, DebugSessionState::Running);
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.threads().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    session
        .set_breakpoints(&[Breakpoint::at(Location::new("script.star", 2))])
        .await
        .unwrap();
    assert_eq!(session.list_frames(1).await.unwrap().len(), 1);
    assert_eq!(session.evaluate(1, "1 + 1").await.unwrap().description, "2");
    assert!(matches!(
        session.list_frames(9).await,
        Err(SessionError::Debugger(_))
    ));
    session.continue_execution(1, Stepping::None).await.unwrap();
    assert_eq!(h.server.requests().await.len(), 4);

    h.manager.stop_all().await;
    assert!(matches!(
        session.threads(),
        Err(SessionError::NotRunning {
            state: DebugSessionState::Completed
        })
    ));
}

#[tokio::test]
async fn only_one_session_at_a_time() {
    let h = harness().await;
    let first = h.manager.new_session("org-1", "tntabc").unwrap();

    assert!(matches!(
        h.manager.new_session("org-2", "tntdef"),
        Err(DebugManagerError::DebugSessionLimitExceeded)
    ));

    h.manager.delete_session(first.id()).await.unwrap();
    assert!(matches!(
        h.manager.get_session(first.id()),
        Err(DebugManagerError::DebugSessionNotFound(_))
    ));

    // The mock gateway serves a single stream; the second session only needs
    // to be registered.
    let second = h.manager.new_session("org-2", "tntdef").unwrap();
    assert_eq!(h.manager.get_session(second.id()).unwrap().org_id(), "org-2");
    assert_eq!(h.manager.sessions().len(), 1);
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let h = harness().await;
    assert!(matches!(
        h.manager.get_session("nope"),
        Err(DebugManagerError::DebugSessionNotFound(id)) if id == "nope"
    ));
    assert!(matches!(
        h.manager.delete_session("nope").await,
        Err(DebugManagerError::DebugSessionNotFound(_))
    ));
}

#[tokio::test]
async fn gateway_ending_early_is_an_error() {
    let h = harness().await;
    let session = h.manager.new_session("org-1", "tntabc").unwrap();

    h.gateway.finish();

    assert_eq!(started(&session).await, DebugSessionState::Error);
    assert_eq!(
        session.info().error.as_deref(),
        Some("gateway stream ended before a proxy request arrived")
    );
}

#[tokio::test]
async fn unreachable_debug_server_is_an_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let gateway = MockGateway::new();
    let manager = DebugManager::with_transport(
        gateway.transport(),
        released_echo(Arc::new(Notify::new())),
        settings(port),
    );
    let session = manager.new_session("org-1", "tntabc").unwrap();
    gateway.send_proxy_request(proxy_request());

    assert_eq!(started(&session).await, DebugSessionState::Error);
    let error = session.error().unwrap_or_default();
    assert!(error.starts_with("unable to connect to the debug server"), "{error}");

    let events = gateway.wait_for_client_events(2).await;
    assert_eq!(error_text(&events[1]), Some(error.as_str()));
}

#[tokio::test]
async fn debug_server_disconnect_is_an_error() {
    let h = harness().await;
    let session = h.manager.new_session("org-1", "tntabc").unwrap();
    h.gateway.send_proxy_request(proxy_request());
    assert_eq!(started(&session).await, DebugSessionState::Running);

    h.server.disconnect();

    wait_for_state(&session, DebugSessionState::Error).await;
    assert_eq!(
        session.error().as_deref(),
        Some("debug server closed the connection")
    );
    let events = h.gateway.wait_for_client_events(2).await;
    assert_eq!(
        error_text(&events[1]),
        Some("debug server closed the connection")
    );
}

#[tokio::test]
async fn info_is_serializable() {
    let h = harness_with(MockDebugServerConfig {
        threads: Vec::new(),
        ..MockDebugServerConfig::default()
    })
    .await;
    let session = h.manager.new_session("org-1", "tntabc").unwrap();
    h.gateway.send_proxy_request(proxy_request());
    started(&session).await;

    let json = serde_json::to_value(session.info()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "id": session.id(),
            "org_id": "org-1",
            "vault": "tntabc",
            "state": "RUNNING",
        })
    );
}

#[tokio::test]
async fn stop_reports_a_result_that_arrives_within_the_grace_period() {
    let server = MockDebugServer::spawn().await.unwrap();
    let gateway = MockGateway::new();
    let release = Arc::new(Notify::new());
    let manager = DebugManager::with_transport(
        gateway.transport(),
        released_echo(release.clone()),
        settings_with_grace(server.port(), Duration::from_secs(2)),
    );
    let session = manager.new_session("org-1", "tntabc").unwrap();
    gateway.send_proxy_request(proxy_request());
    assert_eq!(started(&session).await, DebugSessionState::Running);

    let stopping = tokio::spawn({
        let session = session.clone();
        async move { session.stop().await }
    });
    wait_for_state(&session, DebugSessionState::Completed).await;
    release.notify_one();
    tokio::time::timeout(Duration::from_secs(5), stopping)
        .await
        .unwrap()
        .unwrap();

    let events = gateway.wait_for_client_events(2).await;
    assert_eq!(
        events[1],
        ClientEvent::result_ready(HttpMessage::new("http://x", "{}"))
    );
    assert_eq!(session.state(), DebugSessionState::Completed);
}

#[tokio::test]
async fn error_state_survives_a_later_stop_and_result() {
    let h = harness().await;
    let session = h.manager.new_session("org-1", "tntabc").unwrap();
    h.gateway.send_proxy_request(proxy_request());
    assert_eq!(started(&session).await, DebugSessionState::Running);

    h.server.disconnect();
    wait_for_state(&session, DebugSessionState::Error).await;

    session.stop().await;
    h.release.notify_one();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(session.state(), DebugSessionState::Error);
    assert_eq!(
        session.error().as_deref(),
        Some("debug server closed the connection")
    );
    assert_eq!(
        session.result().outcome(),
        Some(Outcome::Failed("debug server closed the connection".to_string()))
    );
}

#[tokio::test]
async fn deleting_a_completed_session_releases_the_gateway_stream() {
    let h = harness().await;
    let session = h.manager.new_session("org-1", "tntabc").unwrap();
    h.gateway.send_proxy_request(proxy_request());
    assert_eq!(started(&session).await, DebugSessionState::Running);
    h.release.notify_one();
    wait_for_state(&session, DebugSessionState::Completed).await;
    h.gateway.wait_for_client_events(2).await;

    tokio::time::timeout(Duration::from_secs(5), h.manager.delete_session(session.id()))
        .await
        .expect("delete_session did not return")
        .unwrap();

    h.gateway.wait_for_inbound_dropped().await;
    assert!(h.manager.sessions().is_empty());
    assert_eq!(h.gateway.client_events().len(), 2);
}
