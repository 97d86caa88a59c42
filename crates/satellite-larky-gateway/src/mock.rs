use std::{sync::Arc, time::Duration};

use satellite_core::{poison::lock, BoxFuture, ProxyRequest};
use tokio::sync::{mpsc, watch};
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};

use crate::{
    error::{GatewayError, Result},
    proto::{ClientEvent, ServerEvent},
    transport::{GatewayTransport, InboundEvents, OutboundEvents},
};

/// In-memory [`GatewayTransport`] used for unit/integration testing.
///
/// Server events can be queued before the client opens its stream; every
/// client event is recorded.
#[derive(Clone)]
pub struct MockGateway {
    state: Arc<State>,
}

struct State {
    server_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Result<ServerEvent>>>>,
    server_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Result<ServerEvent>>>>,
    open_error: std::sync::Mutex<Option<String>>,
    client_events: watch::Sender<Vec<ClientEvent>>,
    outbound_closed: watch::Sender<bool>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(State {
                server_tx: std::sync::Mutex::new(Some(server_tx)),
                server_rx: std::sync::Mutex::new(Some(server_rx)),
                open_error: std::sync::Mutex::new(None),
                client_events: watch::channel(Vec::new()).0,
                outbound_closed: watch::channel(false).0,
            }),
        }
    }

    pub fn transport(&self) -> Arc<dyn GatewayTransport> {
        Arc::new(self.clone())
    }

    /// Make opening the stream fail with `message`.
    pub fn fail_open(&self, message: impl Into<String>) {
        *lock(&self.state.open_error, "MockGateway.fail_open") = Some(message.into());
    }

    pub fn send(&self, event: ServerEvent) {
        self.push(Ok(event));
    }

    pub fn send_proxy_request(&self, request: ProxyRequest) {
        self.send(ServerEvent::proxy_request(request));
    }

    /// End the server stream with an error status.
    pub fn fail_stream(&self, status: tonic::Status) {
        self.push(Err(GatewayError::Status(status)));
        self.finish();
    }

    /// End the server stream cleanly.
    pub fn finish(&self) {
        lock(&self.state.server_tx, "MockGateway.finish").take();
    }

    pub fn client_events(&self) -> Vec<ClientEvent> {
        self.state.client_events.borrow().clone()
    }

    /// Wait until at least `count` client events were recorded.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within five seconds.
    pub async fn wait_for_client_events(&self, count: usize) -> Vec<ClientEvent> {
        let mut rx = self.state.client_events.subscribe();
        let waited = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|events| events.len() >= count),
        )
        .await;
        match waited {
            Ok(Ok(events)) => events.clone(),
            _ => panic!(
                "expected {count} client events, got {:?}",
                self.client_events()
            ),
        }
    }

    /// Wait until the client closed its side of the stream.
    ///
    /// # Panics
    ///
    /// Panics if that does not happen within five seconds.
    pub async fn wait_for_outbound_closed(&self) {
        let mut rx = self.state.outbound_closed.subscribe();
        let waited =
            tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|closed| *closed)).await;
        assert!(
            matches!(waited, Ok(Ok(_))),
            "client did not close its stream"
        );
    }

    /// Wait until the client dropped its end of the server stream.
    ///
    /// # Panics
    ///
    /// Panics if that does not happen within five seconds, or if the server
    /// stream was already finished.
    pub async fn wait_for_inbound_dropped(&self) {
        let tx = lock(&self.state.server_tx, "MockGateway.wait_for_inbound_dropped").clone();
        let Some(tx) = tx else {
            panic!("server stream already finished");
        };
        let waited = tokio::time::timeout(Duration::from_secs(5), tx.closed()).await;
        assert!(waited.is_ok(), "client kept reading the server stream");
    }

    fn push(&self, event: Result<ServerEvent>) {
        if let Some(tx) = lock(&self.state.server_tx, "MockGateway.push").as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl GatewayTransport for MockGateway {
    fn debug_session(&self, mut outbound: OutboundEvents) -> BoxFuture<Result<InboundEvents>> {
        let state = self.state.clone();
        Box::pin(async move {
            if let Some(message) = lock(&state.open_error, "MockGateway.debug_session").clone() {
                return Err(GatewayError::Unavailable(message));
            }
            let server_rx = lock(&state.server_rx, "MockGateway.debug_session")
                .take()
                .ok_or_else(|| GatewayError::Unavailable("stream already opened".to_string()))?;

            let recorder = state.clone();
            tokio::spawn(async move {
                while let Some(event) = outbound.next().await {
                    recorder
                        .client_events
                        .send_modify(|events| events.push(event));
                }
                recorder.outbound_closed.send_replace(true);
            });

            Ok(Box::pin(UnboundedReceiverStream::new(server_rx)) as InboundEvents)
        })
    }
}
