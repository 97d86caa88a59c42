use std::sync::Arc;

use satellite_core::{Outcome, Pending, PendingResult, ProxyRequest};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    error::GatewayError,
    proto::{server_event, ClientEvent, NewSessionEvent},
    transport::{GatewayTransport, InboundEvents, TonicTransport},
};

/// Text of the error event sent when the session was stopped before the
/// script produced a result.
pub const CANCELLED_MESSAGE: &str = "Cancelled debug session";

/// Identity announced to the gateway when a session's stream opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAnnouncement {
    pub session_id: String,
    pub org_id: String,
    pub vault: String,
}

impl From<SessionAnnouncement> for NewSessionEvent {
    fn from(value: SessionAnnouncement) -> Self {
        Self {
            session_id: value.session_id,
            org_id: value.org_id,
            vault: value.vault,
        }
    }
}

/// Client side of the gateway's `DebugSession` stream.
#[derive(Clone)]
pub struct LarkyGatewayClient {
    transport: Arc<dyn GatewayTransport>,
}

impl LarkyGatewayClient {
    pub fn new(transport: Arc<dyn GatewayTransport>) -> Self {
        Self { transport }
    }

    /// Client talking gRPC to `host:port`.
    pub fn connect_lazy(host: &str, port: u16) -> Self {
        Self::new(Arc::new(TonicTransport::new(host, port)))
    }

    /// Open a debug-session stream in the background.
    ///
    /// The stream announces the session, settles `request_ready` with the
    /// gateway's proxy request (or with the failure that prevented one from
    /// arriving) and, once `result` settles, reports the outcome back as a
    /// single `result_ready` or `error` event.
    pub fn new_session(
        &self,
        announcement: SessionAnnouncement,
        request_ready: Pending<ProxyRequest>,
        result: PendingResult,
    ) -> GatewaySession {
        let close = CancellationToken::new();
        let task = tokio::spawn(run_session(
            self.transport.clone(),
            announcement,
            request_ready,
            result,
            close.clone(),
        ));
        GatewaySession { close, task }
    }
}

/// Handle to a running gateway stream.
#[derive(Debug)]
pub struct GatewaySession {
    close: CancellationToken,
    task: JoinHandle<()>,
}

impl GatewaySession {
    /// Terminate the stream. A result that has not settled yet is cancelled,
    /// so the gateway still receives a final event.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Wait for the stream task to exit.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            tracing::error!(target: "satellite.gateway", error = %err, "gateway session task failed");
        }
    }
}

async fn run_session(
    transport: Arc<dyn GatewayTransport>,
    announcement: SessionAnnouncement,
    request_ready: Pending<ProxyRequest>,
    result: PendingResult,
    close: CancellationToken,
) {
    let session_id = announcement.session_id.clone();
    let (outbound_tx, outbound_rx) = mpsc::channel(4);
    let outbound = tokio::spawn(outbound_leg(
        outbound_tx,
        announcement,
        result.clone(),
        close.clone(),
    ));

    let opened = tokio::select! {
        _ = close.cancelled() => None,
        opened = transport.debug_session(Box::pin(ReceiverStream::new(outbound_rx))) => Some(opened),
    };

    match opened {
        Some(Ok(inbound)) => {
            if let Err(err) = inbound_leg(inbound, &request_ready, &close).await {
                tracing::warn!(
                    target: "satellite.gateway",
                    session_id = %session_id,
                    error = %err,
                    "gateway stream failed"
                );
                let message = err.to_string();
                request_ready.fail(message.clone());
                result.fail(message);
            }
        }
        Some(Err(err)) => {
            tracing::warn!(
                target: "satellite.gateway",
                session_id = %session_id,
                error = %err,
                "failed to open gateway stream"
            );
            let message = err.to_string();
            request_ready.fail(message.clone());
            result.fail(message);
        }
        None => {}
    }
    // Closed before the gateway delivered a request.
    if request_ready.cancel() {
        tracing::debug!(target: "satellite.gateway", session_id = %session_id, "gateway session closed before a proxy request arrived");
    }

    if outbound.await.is_err() {
        tracing::error!(target: "satellite.gateway", session_id = %session_id, "gateway outbound task failed");
    }
    tracing::debug!(target: "satellite.gateway", session_id = %session_id, "gateway session finished");
}

/// Read server events until the stream ends; exactly one `proxy_request` is
/// expected.
async fn inbound_leg(
    mut inbound: InboundEvents,
    request_ready: &Pending<ProxyRequest>,
    close: &CancellationToken,
) -> Result<(), GatewayError> {
    let mut received = false;
    loop {
        let event = tokio::select! {
            _ = close.cancelled() => return Ok(()),
            event = inbound.next() => event,
        };

        let Some(event) = event else {
            break;
        };
        match event?.payload {
            Some(server_event::Payload::ProxyRequest(request)) => {
                if received {
                    return Err(GatewayError::ProtocolViolation(
                        "received a second proxy_request".to_string(),
                    ));
                }
                received = true;
                let request = ProxyRequest::from(request);
                tracing::debug!(target: "satellite.gateway", url = %request.message.url, "received proxy request");
                request_ready.resolve(request);
            }
            None => {
                return Err(GatewayError::ProtocolViolation(
                    "unexpected server event kind".to_string(),
                ));
            }
        }
    }

    if !received {
        return Err(GatewayError::StreamEnded);
    }
    Ok(())
}

/// Announce the session, then report the script outcome exactly once.
async fn outbound_leg(
    outbound: mpsc::Sender<ClientEvent>,
    announcement: SessionAnnouncement,
    result: PendingResult,
    close: CancellationToken,
) {
    tracing::debug!(target: "satellite.gateway", session_id = %announcement.session_id, "sending new_session");
    if outbound
        .send(ClientEvent::new_session(announcement.into()))
        .await
        .is_err()
    {
        return;
    }

    let outcome = tokio::select! {
        outcome = result.wait() => outcome,
        _ = close.cancelled() => {
            result.cancel();
            result.wait().await
        }
    };

    let event = match outcome {
        Outcome::Ready(message) => {
            tracing::debug!(target: "satellite.gateway", "sending result_ready");
            ClientEvent::result_ready(message)
        }
        Outcome::Cancelled => {
            tracing::debug!(target: "satellite.gateway", "sending cancellation error");
            ClientEvent::error(CANCELLED_MESSAGE)
        }
        Outcome::Failed(message) => {
            tracing::debug!(target: "satellite.gateway", error = %message, "sending error");
            ClientEvent::error(message)
        }
    };
    let _ = outbound.send(event).await;
}
