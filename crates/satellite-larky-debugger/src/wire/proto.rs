//! Protobuf messages of the Starlark debugging protocol spoken by the Larky
//! debug server.
//!
//! Field numbers follow `starlark_debugging.proto`; only the requests and
//! events this client issues or understands are declared.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DebugRequest {
    /// Echoed back on the matching reply event.
    #[prost(int64, tag = "1")]
    pub sequence_number: i64,
    #[prost(oneof = "debug_request::Payload", tags = "3, 4, 5, 6, 7, 8, 9")]
    pub payload: ::core::option::Option<debug_request::Payload>,
}

pub mod debug_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "3")]
        SetBreakpoints(super::SetBreakpointsRequest),
        #[prost(message, tag = "4")]
        ContinueExecution(super::ContinueExecutionRequest),
        #[prost(message, tag = "5")]
        Evaluate(super::EvaluateRequest),
        #[prost(message, tag = "6")]
        ListFrames(super::ListFramesRequest),
        #[prost(message, tag = "7")]
        StartDebugging(super::StartDebuggingRequest),
        #[prost(message, tag = "8")]
        PauseThread(super::PauseThreadRequest),
        #[prost(message, tag = "9")]
        GetChildren(super::GetChildrenRequest),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetBreakpointsRequest {
    #[prost(message, repeated, tag = "1")]
    pub breakpoint: ::prost::alloc::vec::Vec<Breakpoint>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContinueExecutionRequest {
    #[prost(int64, tag = "1")]
    pub thread_id: i64,
    #[prost(enumeration = "Stepping", tag = "2")]
    pub stepping: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EvaluateRequest {
    #[prost(int64, tag = "1")]
    pub thread_id: i64,
    #[prost(string, tag = "2")]
    pub statement: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListFramesRequest {
    #[prost(int64, tag = "1")]
    pub thread_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartDebuggingRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PauseThreadRequest {
    #[prost(int64, tag = "1")]
    pub thread_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetChildrenRequest {
    #[prost(int64, tag = "1")]
    pub thread_id: i64,
    #[prost(int64, tag = "2")]
    pub value_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DebugEvent {
    /// Sequence number of the request this event answers, `0` for
    /// unsolicited events.
    #[prost(int64, tag = "1")]
    pub sequence_number: i64,
    #[prost(oneof = "debug_event::Payload", tags = "2, 4, 5, 6, 7, 8, 9, 10, 11, 12")]
    pub payload: ::core::option::Option<debug_event::Payload>,
}

pub mod debug_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        Error(super::Error),
        #[prost(message, tag = "4")]
        SetBreakpoints(super::SetBreakpointsResponse),
        #[prost(message, tag = "5")]
        ContinueExecution(super::ContinueExecutionResponse),
        #[prost(message, tag = "6")]
        Evaluate(super::EvaluateResponse),
        #[prost(message, tag = "7")]
        ListFrames(super::ListFramesResponse),
        #[prost(message, tag = "8")]
        StartDebugging(super::StartDebuggingResponse),
        #[prost(message, tag = "9")]
        PauseThread(super::PauseThreadResponse),
        #[prost(message, tag = "10")]
        GetChildren(super::GetChildrenResponse),
        #[prost(message, tag = "11")]
        ThreadPaused(super::ThreadPausedEvent),
        #[prost(message, tag = "12")]
        ThreadContinued(super::ThreadContinuedEvent),
    }

    impl Payload {
        /// Name of the oneof field, for logs and protocol errors.
        pub fn kind(&self) -> &'static str {
            match self {
                Payload::Error(_) => "error",
                Payload::SetBreakpoints(_) => "set_breakpoints",
                Payload::ContinueExecution(_) => "continue_execution",
                Payload::Evaluate(_) => "evaluate",
                Payload::ListFrames(_) => "list_frames",
                Payload::StartDebugging(_) => "start_debugging",
                Payload::PauseThread(_) => "pause_thread",
                Payload::GetChildren(_) => "get_children",
                Payload::ThreadPaused(_) => "thread_paused",
                Payload::ThreadContinued(_) => "thread_continued",
            }
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetBreakpointsResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContinueExecutionResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EvaluateResponse {
    #[prost(message, optional, tag = "1")]
    pub result: ::core::option::Option<Value>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListFramesResponse {
    #[prost(message, repeated, tag = "1")]
    pub frame: ::prost::alloc::vec::Vec<Frame>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartDebuggingResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PauseThreadResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetChildrenResponse {
    #[prost(message, repeated, tag = "1")]
    pub children: ::prost::alloc::vec::Vec<Value>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ThreadPausedEvent {
    #[prost(message, optional, tag = "1")]
    pub thread: ::core::option::Option<PausedThread>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ThreadContinuedEvent {
    #[prost(int64, tag = "1")]
    pub thread_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Breakpoint {
    #[prost(message, optional, tag = "1")]
    pub location: ::core::option::Option<Location>,
    #[prost(string, tag = "2")]
    pub expression: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Value {
    #[prost(string, tag = "1")]
    pub label: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub description: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(bool, tag = "4")]
    pub has_children: bool,
    #[prost(int64, tag = "5")]
    pub id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Scope {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub binding: ::prost::alloc::vec::Vec<Value>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Frame {
    #[prost(string, tag = "1")]
    pub function_name: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub scope: ::prost::alloc::vec::Vec<Scope>,
    #[prost(message, optional, tag = "3")]
    pub location: ::core::option::Option<Location>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PausedThread {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(enumeration = "PauseReason", tag = "3")]
    pub pause_reason: i32,
    #[prost(message, optional, tag = "4")]
    pub location: ::core::option::Option<Location>,
    #[prost(string, tag = "5")]
    pub condition_error_message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Location {
    #[prost(int32, tag = "1")]
    pub line_number: i32,
    #[prost(string, tag = "2")]
    pub path: ::prost::alloc::string::String,
    #[prost(int32, tag = "3")]
    pub column_number: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Stepping {
    None = 0,
    Into = 1,
    Over = 2,
    Out = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PauseReason {
    Stepping = 0,
    AllThreadsPaused = 1,
    PauseThreadRequest = 2,
    HitBreakpoint = 3,
    ConditionalBreakpointError = 4,
    Initializing = 5,
}
