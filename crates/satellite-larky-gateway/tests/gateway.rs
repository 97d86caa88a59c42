use std::time::Duration;

use pretty_assertions::assert_eq;
use satellite_core::{HttpMessage, Outcome, Pending, PendingResult, ProxyRequest};
use satellite_larky_gateway::{
    mock::MockGateway,
    proto::{client_event, ClientEvent, NewSessionEvent, ServerEvent},
    GatewaySession, LarkyGatewayClient, SessionAnnouncement, CANCELLED_MESSAGE,
};

struct Harness {
    gateway: MockGateway,
    session: GatewaySession,
    request_ready: Pending<ProxyRequest>,
    result: PendingResult,
}

fn open() -> Harness {
    let gateway = MockGateway::new();
    let client = LarkyGatewayClient::new(gateway.transport());
    let request_ready = Pending::new();
    let result = PendingResult::new();
    let session = client.new_session(
        SessionAnnouncement {
            session_id: "session-1".to_string(),
            org_id: "org-1".to_string(),
            vault: "tntabc".to_string(),
        },
        request_ready.clone(),
        result.clone(),
    );
    Harness {
        gateway,
        session,
        request_ready,
        result,
    }
}

fn proxy_request() -> ProxyRequest {
    ProxyRequest {
        script: "def process(m): return m".to_string(),
        message: HttpMessage::new("http://x", "{}"),
    }
}

async fn wait<T>(pending: &Pending<T>) -> Outcome<T>
where
    T: Clone + Send + Sync + 'static,
{
    tokio::time::timeout(Duration::from_secs(5), pending.wait())
        .await
        .expect("pending cell not settled in time")
}

fn error_text(event: &ClientEvent) -> Option<&str> {
    match &event.payload {
        Some(client_event::Payload::Error(error)) => Some(error.message.as_str()),
        _ => None,
    }
}

#[tokio::test]
async fn announces_the_session_first() {
    let h = open();

    let events = h.gateway.wait_for_client_events(1).await;
    assert_eq!(
        events[0],
        ClientEvent::new_session(NewSessionEvent {
            session_id: "session-1".to_string(),
            org_id: "org-1".to_string(),
            vault: "tntabc".to_string(),
        })
    );
    assert!(!h.request_ready.is_settled());
}

#[tokio::test]
async fn proxy_request_then_result_ready() {
    let h = open();
    h.gateway.send_proxy_request(proxy_request());

    assert_eq!(wait(&h.request_ready).await, Outcome::Ready(proxy_request()));

    h.result.resolve(HttpMessage::new("http://x", "{}"));
    let events = h.gateway.wait_for_client_events(2).await;
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[1],
        ClientEvent::result_ready(HttpMessage::new("http://x", "{}"))
    );
    h.gateway.wait_for_outbound_closed().await;

    h.gateway.finish();
    tokio::time::timeout(Duration::from_secs(5), h.session.join())
        .await
        .unwrap();
}

#[tokio::test]
async fn cancelled_result_is_reported_as_an_error_event() {
    let h = open();
    h.gateway.send_proxy_request(proxy_request());
    wait(&h.request_ready).await;

    h.result.cancel();
    let events = h.gateway.wait_for_client_events(2).await;
    assert_eq!(error_text(&events[1]), Some(CANCELLED_MESSAGE));
}

#[tokio::test]
async fn failed_result_is_reported_with_its_text() {
    let h = open();
    h.gateway.send_proxy_request(proxy_request());
    wait(&h.request_ready).await;

    h.result.fail("script failed: boom");
    let events = h.gateway.wait_for_client_events(2).await;
    assert_eq!(error_text(&events[1]), Some("script failed: boom"));
}

#[tokio::test]
async fn closing_cancels_an_unsettled_result() {
    let h = open();
    h.gateway.wait_for_client_events(1).await;

    h.session.close();

    assert_eq!(wait(&h.result).await, Outcome::Cancelled);
    assert_eq!(wait(&h.request_ready).await, Outcome::Cancelled);
    let events = h.gateway.wait_for_client_events(2).await;
    assert_eq!(error_text(&events[1]), Some(CANCELLED_MESSAGE));
}

#[tokio::test]
async fn stream_ending_early_fails_request_ready() {
    let h = open();
    h.gateway.finish();

    let outcome = wait(&h.request_ready).await;
    assert_eq!(
        outcome.error(),
        Some("gateway stream ended before a proxy request arrived")
    );
    assert!(wait(&h.result).await.error().is_some());
}

#[tokio::test]
async fn second_proxy_request_is_a_protocol_violation() {
    let h = open();
    h.gateway.send_proxy_request(proxy_request());
    h.gateway.send_proxy_request(proxy_request());

    assert!(wait(&h.request_ready).await.is_ready());
    let outcome = wait(&h.result).await;
    assert_eq!(
        outcome.error(),
        Some("gateway protocol violation: received a second proxy_request")
    );
    let events = h.gateway.wait_for_client_events(2).await;
    assert_eq!(
        error_text(&events[1]),
        Some("gateway protocol violation: received a second proxy_request")
    );
}

#[tokio::test]
async fn unknown_server_event_is_a_protocol_violation() {
    let h = open();
    h.gateway.send(ServerEvent { payload: None });

    let outcome = wait(&h.request_ready).await;
    assert_eq!(
        outcome.error(),
        Some("gateway protocol violation: unexpected server event kind")
    );
}

#[tokio::test]
async fn stream_status_error_fails_request_ready() {
    let h = open();
    h.gateway.fail_stream(tonic::Status::unavailable("gateway restarting"));

    let outcome = wait(&h.request_ready).await;
    assert_eq!(outcome.error(), Some("gateway stream failed: gateway restarting"));
}

#[tokio::test]
async fn open_failure_fails_request_ready() {
    let gateway = MockGateway::new();
    gateway.fail_open("connection refused");
    let client = LarkyGatewayClient::new(gateway.transport());
    let request_ready = Pending::new();
    let result = PendingResult::new();

    let session = client.new_session(
        SessionAnnouncement {
            session_id: "session-2".to_string(),
            org_id: "org".to_string(),
            vault: "vault".to_string(),
        },
        request_ready.clone(),
        result.clone(),
    );

    let outcome = wait(&request_ready).await;
    assert_eq!(outcome.error(), Some("gateway unavailable: connection refused"));
    tokio::time::timeout(Duration::from_secs(5), session.join())
        .await
        .unwrap();
}

#[tokio::test]
async fn close_after_the_result_stops_reading_the_server_stream() {
    let h = open();
    h.gateway.send_proxy_request(proxy_request());
    wait(&h.request_ready).await;
    h.result.resolve(HttpMessage::new("http://x", "{}"));
    h.gateway.wait_for_outbound_closed().await;

    h.session.close();
    tokio::time::timeout(Duration::from_secs(5), h.session.join())
        .await
        .expect("gateway session did not exit after close");
    h.gateway.wait_for_inbound_dropped().await;
    assert_eq!(h.gateway.client_events().len(), 2);
}
