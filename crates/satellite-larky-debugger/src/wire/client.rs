use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use prost::Message;
use satellite_core::{poison::lock, ProxyRequest, PendingResult};
use tokio::{
    io::AsyncWriteExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{broadcast, mpsc, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use super::{
    framing::{read_frame, write_frame},
    proto::{self, debug_event, debug_request},
    types::{
        Breakpoint, DebuggedThread, DebuggerEvent, LarkyDebuggerError, Result, StackFrame,
        Stepping, ThreadId, Value, ValueId,
    },
};
use crate::evaluator::{EvaluationError, ScriptEvaluator};

#[derive(Debug, Clone)]
pub struct LarkyDebuggerConfig {
    /// Connection attempts before giving up with `UnableToConnectToDebugServer`.
    pub connect_attempts: u32,
    /// Fixed delay between connection attempts.
    pub connect_backoff: Duration,
    /// How long `stop()` waits for the evaluator to finish on its own before
    /// settling the pending result itself.
    pub stop_grace: Duration,
    pub event_channel_size: usize,
}

impl Default for LarkyDebuggerConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            connect_backoff: Duration::from_secs(1),
            stop_grace: Duration::from_secs(1),
            event_channel_size: 64,
        }
    }
}

/// Host/port of a Larky debug server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugServerAddr {
    pub host: String,
    pub port: u16,
}

impl DebugServerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for DebugServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Anything the reader task hands to a waiting command.
#[derive(Debug)]
enum Reply {
    Event {
        sequence_number: i64,
        payload: Option<debug_event::Payload>,
    },
    /// The debug server closed the connection; no reply will follow.
    Disconnected,
}

/// Writer half and reply queue, held together so only one command is ever
/// outstanding.
struct CommandChannel {
    writer: Option<OwnedWriteHalf>,
    replies: mpsc::UnboundedReceiver<Reply>,
    next_sequence: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopCause {
    Requested,
    EvaluationFinished,
    Disconnected,
    Fatal,
}

struct Inner {
    addr: DebugServerAddr,
    channel: AsyncMutex<CommandChannel>,
    threads: Mutex<BTreeMap<ThreadId, DebuggedThread>>,
    events: broadcast::Sender<DebuggerEvent>,
    completed: AtomicBool,
    shutdown: CancellationToken,
    result: PendingResult,
    config: LarkyDebuggerConfig,
}

/// Connection to a Larky debug server driving one script evaluation.
///
/// Cloning is cheap; all clones share the same connection and thread table.
#[derive(Clone)]
pub struct LarkyDebugger {
    inner: Arc<Inner>,
}

impl fmt::Debug for LarkyDebugger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LarkyDebugger")
            .field("addr", &self.inner.addr)
            .field("completed", &self.completed())
            .finish_non_exhaustive()
    }
}

impl LarkyDebugger {
    /// Connect to the debug server at `addr`, then start evaluating `request`
    /// with debugging enabled on the same port.
    ///
    /// The evaluation outcome settles `result`. Once this returns, the
    /// connection's reader task keeps the thread table current until the
    /// debugger is stopped or the server disconnects.
    pub async fn start(
        request: ProxyRequest,
        addr: DebugServerAddr,
        result: PendingResult,
        evaluator: Arc<dyn ScriptEvaluator>,
        config: LarkyDebuggerConfig,
    ) -> Result<Self> {
        let stream = connect_with_retry(&addr, &config).await?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();

        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_channel_size.max(1));

        let inner = Arc::new(Inner {
            addr,
            channel: AsyncMutex::new(CommandChannel {
                writer: Some(writer),
                replies: reply_rx,
                next_sequence: 0,
            }),
            threads: Mutex::new(BTreeMap::new()),
            events,
            completed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            result,
            config,
        });

        let debug_port = inner.addr.port;
        let evaluation = tokio::spawn(evaluator.evaluate(request.script, request.message, debug_port));
        tokio::spawn(supervise_evaluation(inner.clone(), evaluation));
        tokio::spawn(read_loop(reader, reply_tx, inner.clone()));

        Ok(Self { inner })
    }

    /// `true` once the debugger has been stopped, explicitly or because the
    /// connection or the evaluation ended.
    pub fn completed(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn result(&self) -> &PendingResult {
        &self.inner.result
    }

    /// Thread table changes in arrival order.
    pub fn subscribe_events(&self) -> broadcast::Receiver<DebuggerEvent> {
        self.inner.events.subscribe()
    }

    /// Replace the server's breakpoint set.
    pub async fn set_breakpoints(&self, breakpoints: &[Breakpoint]) -> Result<()> {
        let request = proto::SetBreakpointsRequest {
            breakpoint: breakpoints.iter().map(proto::Breakpoint::from).collect(),
        };
        self.send_command(debug_request::Payload::SetBreakpoints(request))
            .await?;
        Ok(())
    }

    /// Snapshot of the currently paused threads, ordered by id.
    pub fn get_threads(&self) -> Result<Vec<DebuggedThread>> {
        self.ensure_running()?;
        Ok(lock(&self.inner.threads, "LarkyDebugger.get_threads")
            .values()
            .cloned()
            .collect())
    }

    pub fn is_paused(&self, thread_id: ThreadId) -> bool {
        lock(&self.inner.threads, "LarkyDebugger.is_paused").contains_key(&thread_id)
    }

    pub async fn list_frames(&self, thread_id: ThreadId) -> Result<Vec<StackFrame>> {
        self.ensure_running()?;
        self.ensure_paused(thread_id)?;

        let request = proto::ListFramesRequest { thread_id };
        match self
            .send_command(debug_request::Payload::ListFrames(request))
            .await?
        {
            debug_event::Payload::ListFrames(response) => Ok(response
                .frame
                .into_iter()
                .map(StackFrame::from)
                .collect()),
            other => Err(unexpected_reply("list_frames", &other)),
        }
    }

    /// Pause `thread_id`, or the whole program when it is `0`.
    ///
    /// Does nothing if the thread is already paused; for `0`, if any thread is.
    pub async fn pause_thread(&self, thread_id: ThreadId) -> Result<()> {
        self.ensure_running()?;
        let already_paused = {
            let threads = lock(&self.inner.threads, "LarkyDebugger.pause_thread");
            if thread_id == 0 {
                !threads.is_empty()
            } else {
                threads.contains_key(&thread_id)
            }
        };
        if already_paused {
            tracing::debug!(target: "satellite.debugger", thread_id, "thread already paused");
            return Ok(());
        }

        let request = proto::PauseThreadRequest { thread_id };
        self.send_command(debug_request::Payload::PauseThread(request))
            .await?;
        Ok(())
    }

    /// Resume `thread_id` (or every thread when it is `0`) with the given
    /// stepping mode.
    pub async fn continue_execution(&self, thread_id: ThreadId, stepping: Stepping) -> Result<()> {
        self.ensure_running()?;
        if thread_id != 0 {
            self.ensure_paused(thread_id)?;
        }

        let mut request = proto::ContinueExecutionRequest {
            thread_id,
            ..Default::default()
        };
        request.set_stepping(stepping.into());
        self.send_command(debug_request::Payload::ContinueExecution(request))
            .await?;
        Ok(())
    }

    /// Expand a value that reported `has_children`.
    pub async fn get_children(&self, thread_id: ThreadId, value_id: ValueId) -> Result<Vec<Value>> {
        self.ensure_running()?;
        self.ensure_paused(thread_id)?;

        let request = proto::GetChildrenRequest {
            thread_id,
            value_id,
        };
        match self
            .send_command(debug_request::Payload::GetChildren(request))
            .await?
        {
            debug_event::Payload::GetChildren(response) => {
                Ok(response.children.into_iter().map(Value::from).collect())
            }
            other => Err(unexpected_reply("get_children", &other)),
        }
    }

    /// Evaluate `statement` in the context of a paused thread.
    pub async fn evaluate(&self, thread_id: ThreadId, statement: &str) -> Result<Value> {
        self.ensure_running()?;
        self.ensure_paused(thread_id)?;

        let request = proto::EvaluateRequest {
            thread_id,
            statement: statement.to_string(),
        };
        match self
            .send_command(debug_request::Payload::Evaluate(request))
            .await?
        {
            debug_event::Payload::Evaluate(response) => response
                .result
                .map(Value::from)
                .ok_or_else(|| {
                    LarkyDebuggerError::Protocol("evaluate reply without a result".to_string())
                }),
            other => Err(unexpected_reply("evaluate", &other)),
        }
    }

    /// Close the connection and settle the pending result.
    ///
    /// If nothing has settled the result yet, this waits up to the configured
    /// grace period for the evaluation to finish and cancels the result
    /// otherwise. Calling it again has no effect.
    pub async fn stop(&self) {
        self.inner.stop(StopCause::Requested).await;
    }

    fn ensure_running(&self) -> Result<()> {
        if self.completed() {
            return Err(LarkyDebuggerError::UsingStoppedDebugger);
        }
        Ok(())
    }

    fn ensure_paused(&self, thread_id: ThreadId) -> Result<()> {
        if !self.is_paused(thread_id) {
            return Err(LarkyDebuggerError::UnknownThreadId(thread_id));
        }
        Ok(())
    }

    async fn send_command(&self, payload: debug_request::Payload) -> Result<debug_event::Payload> {
        self.ensure_running()?;
        let mut guard = self.inner.channel.lock().await;
        let channel = &mut *guard;
        // We may have been stopped while waiting for the previous command.
        self.ensure_running()?;

        channel.next_sequence += 1;
        let sequence_number = channel.next_sequence;
        let request = proto::DebugRequest {
            sequence_number,
            payload: Some(payload),
        };

        let writer = channel
            .writer
            .as_mut()
            .ok_or(LarkyDebuggerError::UsingStoppedDebugger)?;
        let frame = request.encode_to_vec();
        let written = tokio::select! {
            _ = self.inner.shutdown.cancelled() => None,
            written = write_frame(writer, &frame) => Some(written),
        };
        match written {
            Some(written) => written?,
            None => {
                // `stop()` leaves the writer to us while we hold the lock.
                channel.writer = None;
                return Err(LarkyDebuggerError::UsingStoppedDebugger);
            }
        }

        loop {
            let reply = tokio::select! {
                _ = self.inner.shutdown.cancelled() => None,
                reply = channel.replies.recv() => Some(reply),
            };
            let Some(reply) = reply else {
                channel.writer = None;
                return Err(LarkyDebuggerError::UsingStoppedDebugger);
            };

            match reply {
                None | Some(Reply::Disconnected) => return Err(LarkyDebuggerError::ConnectionClosed),
                Some(Reply::Event {
                    sequence_number: reply_sequence,
                    payload,
                }) => {
                    if reply_sequence != 0 && reply_sequence != sequence_number {
                        tracing::debug!(
                            target: "satellite.debugger",
                            expected = sequence_number,
                            got = reply_sequence,
                            "discarding stale reply"
                        );
                        continue;
                    }
                    return match payload {
                        Some(debug_event::Payload::Error(error)) => {
                            Err(LarkyDebuggerError::Server(error.message))
                        }
                        Some(payload) => Ok(payload),
                        None => Err(LarkyDebuggerError::Protocol(
                            "debug event without a payload".to_string(),
                        )),
                    };
                }
            }
        }
    }
}

impl Inner {
    async fn stop(&self, cause: StopCause) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(target: "satellite.debugger", addr = %self.addr, ?cause, "stopping debugger");
        self.shutdown.cancel();

        // A command in flight holds the lock until it sees the cancellation
        // above; it then drops the writer itself.
        if let Ok(mut channel) = self.channel.try_lock() {
            if let Some(mut writer) = channel.writer.take() {
                let _ = writer.shutdown().await;
            }
        }

        if self.result.is_settled() {
            return;
        }
        if self.result.wait_timeout(self.config.stop_grace).await.is_some() {
            return;
        }

        match cause {
            StopCause::Disconnected => {
                tracing::warn!(
                    target: "satellite.debugger",
                    addr = %self.addr,
                    "debug server disconnected before the script finished"
                );
                self.result
                    .fail(LarkyDebuggerError::ConnectionClosed.to_string());
            }
            StopCause::Requested | StopCause::EvaluationFinished | StopCause::Fatal => {
                if self.result.cancel() {
                    tracing::debug!(target: "satellite.debugger", "cancelled pending script result");
                }
            }
        }
    }

    fn dispatch(&self, event: proto::DebugEvent, replies: &mpsc::UnboundedSender<Reply>) {
        let proto::DebugEvent {
            sequence_number,
            payload,
        } = event;

        match payload {
            Some(debug_event::Payload::ThreadPaused(paused)) => {
                let Some(thread) = paused.thread else {
                    tracing::warn!(target: "satellite.debugger", "thread_paused event without a thread");
                    return;
                };
                let thread = DebuggedThread::from(thread);
                tracing::debug!(
                    target: "satellite.debugger",
                    thread_id = thread.id,
                    reason = thread.pause_reason.as_str(),
                    "thread paused"
                );
                lock(&self.threads, "LarkyDebugger.dispatch").insert(thread.id, thread.clone());
                let _ = self.events.send(DebuggerEvent::ThreadPaused(thread));
            }
            Some(debug_event::Payload::ThreadContinued(continued)) => {
                tracing::debug!(
                    target: "satellite.debugger",
                    thread_id = continued.thread_id,
                    "thread continued"
                );
                lock(&self.threads, "LarkyDebugger.dispatch").remove(&continued.thread_id);
                let _ = self
                    .events
                    .send(DebuggerEvent::ThreadContinued(continued.thread_id));
            }
            payload => {
                let _ = replies.send(Reply::Event {
                    sequence_number,
                    payload,
                });
            }
        }
    }
}

fn unexpected_reply(command: &str, payload: &debug_event::Payload) -> LarkyDebuggerError {
    LarkyDebuggerError::Protocol(format!(
        "unexpected `{}` reply to `{command}`",
        payload.kind()
    ))
}

async fn connect_with_retry(
    addr: &DebugServerAddr,
    config: &LarkyDebuggerConfig,
) -> Result<TcpStream> {
    let attempts = config.connect_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match TcpStream::connect((addr.host.as_str(), addr.port)).await {
            Ok(stream) => {
                tracing::debug!(target: "satellite.debugger", %addr, attempt, "connected to debug server");
                return Ok(stream);
            }
            Err(err) => {
                tracing::warn!(
                    target: "satellite.debugger",
                    %addr,
                    attempt,
                    error = %err,
                    "failed to connect to debug server"
                );
                last_err = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(config.connect_backoff).await;
                }
            }
        }
    }

    Err(LarkyDebuggerError::UnableToConnectToDebugServer {
        addr: addr.to_string(),
        attempts,
        source: last_err.unwrap_or_else(|| std::io::Error::other("no connection attempt made")),
    })
}

async fn supervise_evaluation(
    inner: Arc<Inner>,
    evaluation: JoinHandle<std::result::Result<satellite_core::HttpMessage, EvaluationError>>,
) {
    match evaluation.await {
        Ok(Ok(message)) => {
            tracing::debug!(target: "satellite.debugger", "script evaluation finished");
            inner.result.resolve(message);
        }
        Ok(Err(err)) => {
            tracing::warn!(target: "satellite.debugger", error = %err, "script evaluation failed");
            inner.result.fail(err.to_string());
        }
        Err(err) => {
            tracing::error!(target: "satellite.debugger", error = %err, "script evaluator task failed");
            inner.result.fail(format!("script evaluator task failed: {err}"));
        }
    }
    inner.stop(StopCause::EvaluationFinished).await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    replies: mpsc::UnboundedSender<Reply>,
    inner: Arc<Inner>,
) {
    loop {
        let frame = tokio::select! {
            _ = inner.shutdown.cancelled() => return,
            frame = read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(Some(bytes)) => match proto::DebugEvent::decode(bytes.as_slice()) {
                Ok(event) => inner.dispatch(event, &replies),
                Err(err) => {
                    fail_connection(&inner, LarkyDebuggerError::Decode(err)).await;
                    return;
                }
            },
            Ok(None) => {
                tracing::debug!(target: "satellite.debugger", addr = %inner.addr, "debug server closed the connection");
                let _ = replies.send(Reply::Disconnected);
                inner.stop(StopCause::Disconnected).await;
                return;
            }
            Err(LarkyDebuggerError::Io(err)) => {
                tracing::debug!(target: "satellite.debugger", error = %err, "debug server connection failed");
                drop(replies);
                inner.stop(StopCause::Disconnected).await;
                return;
            }
            Err(err) => {
                fail_connection(&inner, err).await;
                return;
            }
        }
    }
}

async fn fail_connection(inner: &Inner, err: LarkyDebuggerError) {
    tracing::error!(target: "satellite.debugger", addr = %inner.addr, error = %err, "fatal debug protocol error");
    inner.result.fail(err.to_string());
    inner.stop(StopCause::Fatal).await;
}
