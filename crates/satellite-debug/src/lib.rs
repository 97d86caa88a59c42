//! Debug sessions for Larky scripts.
//!
//! A [`DebugSession`] opens a stream to the Larky gateway, waits for it to
//! deliver a script and an HTTP message, runs the script under a
//! [`satellite_larky_debugger::LarkyDebugger`] and reports the result back
//! through the same stream. [`DebugManager`] owns the sessions of a process
//! and enforces that only one is active at a time.

mod error;
mod manager;
mod session;

pub use error::{DebugManagerError, SessionError};
pub use manager::DebugManager;
pub use session::{DebugSession, DebugSessionState, SessionInfo, SessionSettings};
