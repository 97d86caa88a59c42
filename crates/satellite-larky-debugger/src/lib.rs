//! Client for the Larky debug server.
//!
//! [`LarkyDebugger`] connects to the debug server a script runner exposes,
//! starts the script through a [`ScriptEvaluator`] and then lets callers set
//! breakpoints, inspect paused threads and step through execution. The
//! evaluation outcome is delivered through a [`satellite_core::PendingResult`].

pub mod evaluator;
pub mod wire;

pub use evaluator::{
    BoxFuture, EvaluationError, FnEvaluator, ProcessEvaluator, ScriptEvaluator,
};
pub use wire::{
    Breakpoint, DebugServerAddr, DebuggedThread, DebuggerEvent, LarkyDebugger,
    LarkyDebuggerConfig, LarkyDebuggerError, Location, PauseReason, Scope, StackFrame, Stepping,
    ThreadId, Value, ValueId,
};
