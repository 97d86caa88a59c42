//! Wire-level Larky debug protocol.
//!
//! The debug server speaks protobuf `DebugRequest`/`DebugEvent` messages over
//! TCP, each prefixed with its varint-encoded length.

mod client;
pub mod framing;
pub mod proto;
pub mod types;

pub use client::{DebugServerAddr, LarkyDebugger, LarkyDebuggerConfig};
pub use types::{
    Breakpoint, DebuggedThread, DebuggerEvent, LarkyDebuggerError, Location, PauseReason, Result,
    Scope, StackFrame, Stepping, ThreadId, Value, ValueId,
};

// The wire-protocol mock server is only needed for tests and downstream integration suites.
#[cfg(any(test, feature = "wire-test-support"))]
pub mod mock;
