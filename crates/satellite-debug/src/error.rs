use satellite_larky_debugger::LarkyDebuggerError;
use thiserror::Error;

use crate::session::DebugSessionState;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("debug session is {state}, expected RUNNING")]
    NotRunning { state: DebugSessionState },
    #[error(transparent)]
    Debugger(#[from] LarkyDebuggerError),
}

#[derive(Debug, Error)]
pub enum DebugManagerError {
    #[error("only one debug session may be active at a time")]
    DebugSessionLimitExceeded,
    #[error("debug session `{0}` not found")]
    DebugSessionNotFound(String),
}
