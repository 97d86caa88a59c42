//! Protobuf messages of the `larky_gateway.LarkyGateway` service.

use std::collections::BTreeMap;

/// Fully-qualified path of the bidirectional `DebugSession` RPC.
pub const DEBUG_SESSION_PATH: &str = "/larky_gateway.LarkyGateway/DebugSession";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientEvent {
    #[prost(oneof = "client_event::Payload", tags = "1, 2, 3")]
    pub payload: ::core::option::Option<client_event::Payload>,
}

pub mod client_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        NewSession(super::NewSessionEvent),
        #[prost(message, tag = "2")]
        ResultReady(super::ResultReadyEvent),
        #[prost(message, tag = "3")]
        Error(super::ErrorEvent),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NewSessionEvent {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub org_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub vault: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultReadyEvent {
    #[prost(message, optional, tag = "1")]
    pub http_message: ::core::option::Option<HttpMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorEvent {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerEvent {
    #[prost(oneof = "server_event::Payload", tags = "1")]
    pub payload: ::core::option::Option<server_event::Payload>,
}

pub mod server_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        ProxyRequest(super::ProxyRequestEvent),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProxyRequestEvent {
    #[prost(message, optional, tag = "1")]
    pub http_message: ::core::option::Option<HttpMessage>,
    #[prost(string, tag = "2")]
    pub larky_script: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpMessage {
    #[prost(string, tag = "1")]
    pub url: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub data: ::prost::alloc::string::String,
    #[prost(btree_map = "string, string", tag = "3")]
    pub headers: BTreeMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}

impl From<satellite_core::HttpMessage> for HttpMessage {
    fn from(value: satellite_core::HttpMessage) -> Self {
        Self {
            url: value.url,
            data: value.data,
            headers: value.headers,
        }
    }
}

impl From<HttpMessage> for satellite_core::HttpMessage {
    fn from(value: HttpMessage) -> Self {
        Self {
            url: value.url,
            data: value.data,
            headers: value.headers,
        }
    }
}

impl From<ProxyRequestEvent> for satellite_core::ProxyRequest {
    fn from(value: ProxyRequestEvent) -> Self {
        Self {
            script: value.larky_script,
            message: value.http_message.map(Into::into).unwrap_or_default(),
        }
    }
}

impl From<satellite_core::ProxyRequest> for ProxyRequestEvent {
    fn from(value: satellite_core::ProxyRequest) -> Self {
        Self {
            http_message: Some(value.message.into()),
            larky_script: value.script,
        }
    }
}

impl ClientEvent {
    pub fn new_session(event: NewSessionEvent) -> Self {
        Self {
            payload: Some(client_event::Payload::NewSession(event)),
        }
    }

    pub fn result_ready(message: satellite_core::HttpMessage) -> Self {
        Self {
            payload: Some(client_event::Payload::ResultReady(ResultReadyEvent {
                http_message: Some(message.into()),
            })),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            payload: Some(client_event::Payload::Error(ErrorEvent {
                message: message.into(),
            })),
        }
    }
}

impl ServerEvent {
    pub fn proxy_request(request: satellite_core::ProxyRequest) -> Self {
        Self {
            payload: Some(server_event::Payload::ProxyRequest(request.into())),
        }
    }
}
