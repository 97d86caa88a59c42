use std::pin::Pin;

use satellite_core::BoxFuture;
use tokio_stream::{Stream, StreamExt};
use tonic::{
    client::Grpc,
    codec::ProstCodec,
    codegen::http::uri::PathAndQuery,
    transport::{Channel, Endpoint},
};

use crate::{
    error::{GatewayError, Result},
    proto::{ClientEvent, ServerEvent, DEBUG_SESSION_PATH},
};

/// Events the client streams to the gateway.
pub type OutboundEvents = Pin<Box<dyn Stream<Item = ClientEvent> + Send + 'static>>;

/// Events the gateway streams back; an `Err` item ends the stream.
pub type InboundEvents = Pin<Box<dyn Stream<Item = Result<ServerEvent>> + Send + 'static>>;

/// Opens `DebugSession` streams to a Larky gateway.
pub trait GatewayTransport: Send + Sync + 'static {
    fn debug_session(&self, outbound: OutboundEvents) -> BoxFuture<Result<InboundEvents>>;
}

/// gRPC transport over a plaintext HTTP/2 channel.
#[derive(Debug, Clone)]
pub struct TonicTransport {
    endpoint: String,
}

impl TonicTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            endpoint: format!("http://{host}:{port}"),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl GatewayTransport for TonicTransport {
    fn debug_session(&self, outbound: OutboundEvents) -> BoxFuture<Result<InboundEvents>> {
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            tracing::debug!(target: "satellite.gateway", %endpoint, "connecting to Larky gateway");
            let channel: Channel = Endpoint::from_shared(endpoint)?.connect().await?;

            let mut grpc = Grpc::new(channel);
            grpc.ready().await?;

            let codec: ProstCodec<ClientEvent, ServerEvent> = ProstCodec::default();
            let response = grpc
                .streaming(
                    tonic::Request::new(outbound),
                    PathAndQuery::from_static(DEBUG_SESSION_PATH),
                    codec,
                )
                .await?;

            let inbound = response
                .into_inner()
                .map(|event| event.map_err(GatewayError::from));
            Ok(Box::pin(inbound) as InboundEvents)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_uses_plain_http() {
        assert_eq!(TonicTransport::new("localhost", 50051).endpoint(), "http://localhost:50051");
    }
}
