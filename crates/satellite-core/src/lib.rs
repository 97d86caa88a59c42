//! Core shared types for the satellite Larky debug engine.
//!
//! The debugger, gateway and session crates all exchange the same handful of
//! values: the intercepted HTTP message, the proxy request delivered by the
//! gateway, and the single-assignment [`Pending`] cell that hands the script
//! outcome from one task to another.

use std::{collections::BTreeMap, future::Future, pin::Pin};

use serde::{Deserialize, Serialize};

mod pending;
pub mod poison;

pub use pending::{Outcome, Pending, PendingResult};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// An intercepted HTTP request/response as seen by a Larky script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMessage {
    pub url: String,
    pub data: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl HttpMessage {
    pub fn new(url: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            data: data.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// The script/message pair the gateway asks us to debug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub script: String,
    pub message: HttpMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_message_json_defaults_missing_headers() {
        let message: HttpMessage =
            serde_json::from_str(r#"{"url":"http://x","data":"{}"}"#).unwrap();
        assert_eq!(message, HttpMessage::new("http://x", "{}"));
    }

    #[test]
    fn http_message_headers_serialize_in_key_order() {
        let message = HttpMessage::new("http://x", "")
            .with_header("b", "2")
            .with_header("a", "1");
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"url":"http://x","data":"","headers":{"a":"1","b":"2"}}"#
        );
    }
}
