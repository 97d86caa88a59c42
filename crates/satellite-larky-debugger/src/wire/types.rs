use std::{fmt, io, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::proto;

/// Server-assigned identifier of an execution thread. `0` addresses the whole
/// program where the protocol allows it.
pub type ThreadId = i64;

/// Opaque handle of a value whose children can be fetched lazily.
pub type ValueId = i64;

#[derive(Debug, Error)]
pub enum LarkyDebuggerError {
    #[error("unable to connect to the debug server at {addr} after {attempts} attempts")]
    UnableToConnectToDebugServer {
        addr: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("frame size prefix does not fit in 64 bits")]
    DataSizeOverflow,
    #[error("frame too large: {len} > {max}")]
    FrameTooLarge { len: u64, max: usize },
    #[error("failed to decode debug event: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("debug protocol error: {0}")]
    Protocol(String),
    #[error("got error from the debug server: {0}")]
    Server(String),
    #[error("unknown thread id {0}")]
    UnknownThreadId(ThreadId),
    #[error("debugger has already been stopped")]
    UsingStoppedDebugger,
    #[error("debug server closed the connection")]
    ConnectionClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = LarkyDebuggerError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub line_number: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<i32>,
}

impl Location {
    pub fn new(path: impl Into<String>, line_number: i32) -> Self {
        Self {
            path: path.into(),
            line_number,
            column_number: None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.line_number)?;
        if let Some(column) = self.column_number {
            write!(f, ":{column}")?;
        }
        Ok(())
    }
}

/// Parses `path:line` or `path:line:column`.
impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse_number = |value: &str| {
            value
                .parse::<i32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("invalid location `{s}`: `{value}` is not a positive number"))
        };

        let (rest, last) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid location `{s}`: expected `path:line[:column]`"))?;
        let last = parse_number(last)?;

        // `path:line:column` when the segment before the last colon is numeric too.
        if let Some((path, line)) = rest.rsplit_once(':') {
            if let Ok(line) = parse_number(line) {
                if !path.is_empty() {
                    return Ok(Location {
                        path: path.to_string(),
                        line_number: line,
                        column_number: Some(last),
                    });
                }
            }
        }

        if rest.is_empty() {
            return Err(format!("invalid location `{s}`: missing path"));
        }
        Ok(Location::new(rest, last))
    }
}

impl From<proto::Location> for Location {
    fn from(value: proto::Location) -> Self {
        Self {
            path: value.path,
            line_number: value.line_number,
            column_number: (value.column_number != 0).then_some(value.column_number),
        }
    }
}

impl From<&Location> for proto::Location {
    fn from(value: &Location) -> Self {
        Self {
            line_number: value.line_number,
            path: value.path.clone(),
            column_number: value.column_number.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub location: Location,
    /// Optional condition; the thread only pauses when it evaluates truthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl Breakpoint {
    pub fn at(location: Location) -> Self {
        Self {
            location,
            expression: None,
        }
    }
}

impl From<&Breakpoint> for proto::Breakpoint {
    fn from(value: &Breakpoint) -> Self {
        Self {
            location: Some((&value.location).into()),
            expression: value.expression.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PauseReason {
    Stepping,
    AllThreadsPaused,
    PauseThreadRequest,
    HitBreakpoint,
    ConditionalBreakpointError,
    Initializing,
}

impl PauseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PauseReason::Stepping => "STEPPING",
            PauseReason::AllThreadsPaused => "ALL_THREADS_PAUSED",
            PauseReason::PauseThreadRequest => "PAUSE_THREAD_REQUEST",
            PauseReason::HitBreakpoint => "HIT_BREAKPOINT",
            PauseReason::ConditionalBreakpointError => "CONDITIONAL_BREAKPOINT_ERROR",
            PauseReason::Initializing => "INITIALIZING",
        }
    }
}

impl From<proto::PauseReason> for PauseReason {
    fn from(value: proto::PauseReason) -> Self {
        match value {
            proto::PauseReason::Stepping => PauseReason::Stepping,
            proto::PauseReason::AllThreadsPaused => PauseReason::AllThreadsPaused,
            proto::PauseReason::PauseThreadRequest => PauseReason::PauseThreadRequest,
            proto::PauseReason::HitBreakpoint => PauseReason::HitBreakpoint,
            proto::PauseReason::ConditionalBreakpointError => {
                PauseReason::ConditionalBreakpointError
            }
            proto::PauseReason::Initializing => PauseReason::Initializing,
        }
    }
}

impl From<PauseReason> for proto::PauseReason {
    fn from(value: PauseReason) -> Self {
        match value {
            PauseReason::Stepping => proto::PauseReason::Stepping,
            PauseReason::AllThreadsPaused => proto::PauseReason::AllThreadsPaused,
            PauseReason::PauseThreadRequest => proto::PauseReason::PauseThreadRequest,
            PauseReason::HitBreakpoint => proto::PauseReason::HitBreakpoint,
            PauseReason::ConditionalBreakpointError => {
                proto::PauseReason::ConditionalBreakpointError
            }
            PauseReason::Initializing => proto::PauseReason::Initializing,
        }
    }
}

/// A thread the debug server reported as paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebuggedThread {
    pub id: ThreadId,
    pub name: String,
    pub pause_reason: PauseReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl From<proto::PausedThread> for DebuggedThread {
    fn from(value: proto::PausedThread) -> Self {
        let pause_reason = value.pause_reason().into();
        Self {
            id: value.id,
            name: value.name,
            pause_reason,
            location: value.location.map(Location::from),
        }
    }
}

impl From<&DebuggedThread> for proto::PausedThread {
    fn from(value: &DebuggedThread) -> Self {
        let mut thread = proto::PausedThread {
            id: value.id,
            name: value.name.clone(),
            location: value.location.as_ref().map(proto::Location::from),
            ..Default::default()
        };
        thread.set_pause_reason(value.pause_reason.into());
        thread
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub label: String,
    pub description: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub has_children: bool,
    /// Handle for [`crate::LarkyDebugger::get_children`]; only set when
    /// `has_children` is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ValueId>,
}

impl From<proto::Value> for Value {
    fn from(value: proto::Value) -> Self {
        Self {
            label: value.label,
            description: value.description,
            type_name: value.r#type,
            has_children: value.has_children,
            id: (value.id != 0).then_some(value.id),
        }
    }
}

impl From<&Value> for proto::Value {
    fn from(value: &Value) -> Self {
        Self {
            label: value.label.clone(),
            description: value.description.clone(),
            r#type: value.type_name.clone(),
            has_children: value.has_children,
            id: value.id.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub bindings: Vec<Value>,
}

impl From<proto::Scope> for Scope {
    fn from(value: proto::Scope) -> Self {
        Self {
            name: value.name,
            bindings: value.binding.into_iter().map(Value::from).collect(),
        }
    }
}

impl From<&Scope> for proto::Scope {
    fn from(value: &Scope) -> Self {
        Self {
            name: value.name.clone(),
            binding: value.bindings.iter().map(proto::Value::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function_name: String,
    pub scopes: Vec<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl From<proto::Frame> for StackFrame {
    fn from(value: proto::Frame) -> Self {
        Self {
            function_name: value.function_name,
            scopes: value.scope.into_iter().map(Scope::from).collect(),
            location: value.location.map(Location::from),
        }
    }
}

impl From<&StackFrame> for proto::Frame {
    fn from(value: &StackFrame) -> Self {
        Self {
            function_name: value.function_name.clone(),
            scope: value.scopes.iter().map(proto::Scope::from).collect(),
            location: value.location.as_ref().map(proto::Location::from),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stepping {
    #[default]
    None,
    Into,
    Over,
    Out,
}

impl FromStr for Stepping {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Stepping::None),
            "into" => Ok(Stepping::Into),
            "over" => Ok(Stepping::Over),
            "out" => Ok(Stepping::Out),
            other => Err(format!(
                "unknown stepping mode `{other}` (expected none, into, over or out)"
            )),
        }
    }
}

impl From<Stepping> for proto::Stepping {
    fn from(value: Stepping) -> Self {
        match value {
            Stepping::None => proto::Stepping::None,
            Stepping::Into => proto::Stepping::Into,
            Stepping::Over => proto::Stepping::Over,
            Stepping::Out => proto::Stepping::Out,
        }
    }
}

impl From<proto::Stepping> for Stepping {
    fn from(value: proto::Stepping) -> Self {
        match value {
            proto::Stepping::None => Stepping::None,
            proto::Stepping::Into => Stepping::Into,
            proto::Stepping::Over => Stepping::Over,
            proto::Stepping::Out => Stepping::Out,
        }
    }
}

/// Thread table changes, in the order the debug server reported them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerEvent {
    ThreadPaused(DebuggedThread),
    ThreadContinued(ThreadId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_parses_line_and_column() {
        assert_eq!(
            "script.star:12".parse::<Location>().unwrap(),
            Location::new("script.star", 12)
        );
        assert_eq!(
            "/tmp/a:b.star:3:7".parse::<Location>().unwrap(),
            Location {
                path: "/tmp/a:b.star".to_string(),
                line_number: 3,
                column_number: Some(7),
            }
        );
    }

    #[test]
    fn location_rejects_missing_line() {
        assert!("script.star".parse::<Location>().is_err());
        assert!(":4".parse::<Location>().is_err());
        assert!("script.star:0".parse::<Location>().is_err());
    }

    #[test]
    fn zero_proto_column_maps_to_none() {
        let location = Location::from(proto::Location {
            line_number: 4,
            path: "a.star".to_string(),
            column_number: 0,
        });
        assert_eq!(location.column_number, None);
        assert_eq!(location.to_string(), "a.star:4");
    }

    #[test]
    fn pause_reason_serializes_as_protocol_name() {
        let json = serde_json::to_string(&PauseReason::HitBreakpoint).unwrap();
        assert_eq!(json, r#""HIT_BREAKPOINT""#);
        assert_eq!(PauseReason::Initializing.as_str(), "INITIALIZING");
    }

    #[test]
    fn stepping_parses_case_insensitively() {
        assert_eq!("OVER".parse::<Stepping>().unwrap(), Stepping::Over);
        assert!("sideways".parse::<Stepping>().is_err());
    }
}
