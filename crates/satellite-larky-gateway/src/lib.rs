//! Client for the Larky gateway's `DebugSession` stream.
//!
//! A debug session starts with the gateway handing us the script and message
//! to debug and ends with us handing back the script's result. Both legs run
//! on one bidirectional gRPC stream; [`LarkyGatewayClient::new_session`]
//! drives it in the background and connects it to the rest of the session
//! through two [`satellite_core::Pending`] cells.

mod client;
mod error;
pub mod proto;
mod transport;

pub use client::{GatewaySession, LarkyGatewayClient, SessionAnnouncement, CANCELLED_MESSAGE};
pub use error::{GatewayError, Result};
pub use transport::{GatewayTransport, InboundEvents, OutboundEvents, TonicTransport};

#[cfg(any(test, feature = "test-support"))]
pub mod mock;
