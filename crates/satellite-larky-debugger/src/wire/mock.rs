use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use prost::Message;
use tokio::{
    io::AsyncWriteExt,
    net::{tcp::OwnedWriteHalf, TcpListener},
    sync::{mpsc, Mutex},
};
use tokio_util::sync::CancellationToken;

use super::{
    framing::{encode_frame, read_frame, write_frame},
    proto::{self, debug_event, debug_request},
    types::{DebuggedThread, Location, PauseReason, StackFrame, ThreadId, Value},
};

/// A tiny Larky debug server used for unit/integration testing.
///
/// It accepts a single connection, reports the configured threads as paused
/// right away and answers every request with canned data, echoing the
/// request's sequence number.
pub struct MockDebugServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    control: mpsc::UnboundedSender<Control>,
    state: Arc<State>,
}

#[derive(Clone, Debug)]
pub struct MockDebugServerConfig {
    /// Threads reported paused as soon as the client connects.
    pub threads: Vec<DebuggedThread>,
    pub frames: Vec<StackFrame>,
    pub children: Vec<Value>,
    pub evaluate_result: Value,
    /// When set, `list_frames` is answered with this error message.
    pub list_frames_error: Option<String>,
}

impl Default for MockDebugServerConfig {
    fn default() -> Self {
        Self {
            threads: vec![sample_thread(1)],
            frames: vec![StackFrame {
                function_name: "main".to_string(),
                scopes: Vec::new(),
                location: Some(Location::new("script.star", 1)),
            }],
            children: Vec::new(),
            evaluate_result: Value {
                label: String::new(),
                description: "2".to_string(),
                type_name: "int".to_string(),
                has_children: false,
                id: None,
            },
            list_frames_error: None,
        }
    }
}

/// A thread paused on `script.star:1` while initializing.
pub fn sample_thread(id: ThreadId) -> DebuggedThread {
    DebuggedThread {
        id,
        name: format!("thread-{id}"),
        pause_reason: PauseReason::Initializing,
        location: Some(Location::new("script.star", 1)),
    }
}

#[derive(Debug)]
enum Control {
    Event(proto::DebugEvent),
    Raw(Vec<u8>),
    Disconnect,
}

#[derive(Default)]
struct State {
    requests: Mutex<Vec<proto::DebugRequest>>,
}

impl MockDebugServer {
    pub async fn spawn() -> std::io::Result<Self> {
        Self::spawn_with_config(MockDebugServerConfig::default()).await
    }

    pub async fn spawn_with_config(config: MockDebugServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let state = Arc::new(State::default());
        let (control, control_rx) = mpsc::unbounded_channel();

        let task_shutdown = shutdown.clone();
        let task_state = state.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = task_shutdown.cancelled() => {}
                accepted = listener.accept() => {
                    if let Ok((socket, _)) = accepted {
                        let _ = socket.set_nodelay(true);
                        serve(socket, config, task_state, control_rx, task_shutdown).await;
                    }
                }
            }
        });

        Ok(Self {
            addr,
            shutdown,
            control,
            state,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every request received so far, in arrival order.
    pub async fn requests(&self) -> Vec<proto::DebugRequest> {
        self.state.requests.lock().await.clone()
    }

    /// Push an unsolicited event to the client.
    pub fn send_event(&self, payload: debug_event::Payload) {
        self.send_event_with_sequence(0, payload);
    }

    pub fn send_event_with_sequence(&self, sequence_number: i64, payload: debug_event::Payload) {
        let _ = self.control.send(Control::Event(proto::DebugEvent {
            sequence_number,
            payload: Some(payload),
        }));
    }

    /// Write `bytes` to the socket as-is.
    pub fn send_raw(&self, bytes: Vec<u8>) {
        let _ = self.control.send(Control::Raw(bytes));
    }

    /// Close the connection from the server side.
    pub fn disconnect(&self) {
        let _ = self.control.send(Control::Disconnect);
    }
}

impl Drop for MockDebugServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve(
    socket: tokio::net::TcpStream,
    config: MockDebugServerConfig,
    state: Arc<State>,
    mut control: mpsc::UnboundedReceiver<Control>,
    shutdown: CancellationToken,
) {
    let (mut reader, mut writer) = socket.into_split();

    // Reading on a separate task keeps partially read frames intact when the
    // select below picks another branch.
    let (request_tx, mut requests) = mpsc::unbounded_channel();
    let reader_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = reader_shutdown.cancelled() => return,
                frame = read_frame(&mut reader) => frame,
            };
            let Ok(Some(bytes)) = frame else { return };
            let Ok(request) = proto::DebugRequest::decode(bytes.as_slice()) else {
                return;
            };
            if request_tx.send(request).is_err() {
                return;
            }
        }
    });

    let mut paused: BTreeMap<ThreadId, DebuggedThread> = BTreeMap::new();
    for thread in &config.threads {
        paused.insert(thread.id, thread.clone());
        if send(&mut writer, 0, thread_paused(thread)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            command = control.recv() => {
                let result = match command {
                    Some(Control::Event(event)) => {
                        track(&mut paused, &event);
                        write_frame(&mut writer, &event.encode_to_vec()).await.map_err(|_| ())
                    }
                    Some(Control::Raw(bytes)) => writer.write_all(&bytes).await.map_err(|_| ()),
                    Some(Control::Disconnect) | None => break,
                };
                if result.is_err() {
                    break;
                }
            }
            request = requests.recv() => {
                let Some(request) = request else { break };
                state.requests.lock().await.push(request.clone());
                if handle(&mut writer, &config, &mut paused, request).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = writer.shutdown().await;
}

async fn handle(
    writer: &mut OwnedWriteHalf,
    config: &MockDebugServerConfig,
    paused: &mut BTreeMap<ThreadId, DebuggedThread>,
    request: proto::DebugRequest,
) -> Result<(), ()> {
    let seq = request.sequence_number;
    let Some(payload) = request.payload else {
        return send(writer, seq, error("request without a payload")).await;
    };

    match payload {
        debug_request::Payload::SetBreakpoints(_) => {
            send(
                writer,
                seq,
                debug_event::Payload::SetBreakpoints(proto::SetBreakpointsResponse {}),
            )
            .await
        }
        debug_request::Payload::StartDebugging(_) => {
            send(
                writer,
                seq,
                debug_event::Payload::StartDebugging(proto::StartDebuggingResponse {}),
            )
            .await
        }
        debug_request::Payload::ListFrames(_) => {
            let reply = match &config.list_frames_error {
                Some(message) => error(message),
                None => debug_event::Payload::ListFrames(proto::ListFramesResponse {
                    frame: config.frames.iter().map(proto::Frame::from).collect(),
                }),
            };
            send(writer, seq, reply).await
        }
        debug_request::Payload::Evaluate(_) => {
            send(
                writer,
                seq,
                debug_event::Payload::Evaluate(proto::EvaluateResponse {
                    result: Some((&config.evaluate_result).into()),
                }),
            )
            .await
        }
        debug_request::Payload::GetChildren(_) => {
            send(
                writer,
                seq,
                debug_event::Payload::GetChildren(proto::GetChildrenResponse {
                    children: config.children.iter().map(proto::Value::from).collect(),
                }),
            )
            .await
        }
        debug_request::Payload::PauseThread(req) => {
            let id = if req.thread_id == 0 { 1 } else { req.thread_id };
            let thread = DebuggedThread {
                pause_reason: PauseReason::PauseThreadRequest,
                ..sample_thread(id)
            };
            send(writer, 0, thread_paused(&thread)).await?;
            paused.insert(id, thread);
            send(
                writer,
                seq,
                debug_event::Payload::PauseThread(proto::PauseThreadResponse {}),
            )
            .await
        }
        debug_request::Payload::ContinueExecution(req) => {
            let resumed: Vec<DebuggedThread> = if req.thread_id == 0 {
                std::mem::take(paused).into_values().collect()
            } else {
                paused.remove(&req.thread_id).into_iter().collect()
            };
            for thread in &resumed {
                send(
                    writer,
                    0,
                    debug_event::Payload::ThreadContinued(proto::ThreadContinuedEvent {
                        thread_id: thread.id,
                    }),
                )
                .await?;
            }
            send(
                writer,
                seq,
                debug_event::Payload::ContinueExecution(proto::ContinueExecutionResponse {}),
            )
            .await?;

            if req.stepping() != proto::Stepping::None {
                for mut thread in resumed {
                    thread.pause_reason = PauseReason::Stepping;
                    if let Some(location) = thread.location.as_mut() {
                        location.line_number += 1;
                    }
                    send(writer, 0, thread_paused(&thread)).await?;
                    paused.insert(thread.id, thread);
                }
            }
            Ok(())
        }
    }
}

fn track(paused: &mut BTreeMap<ThreadId, DebuggedThread>, event: &proto::DebugEvent) {
    match &event.payload {
        Some(debug_event::Payload::ThreadPaused(proto::ThreadPausedEvent {
            thread: Some(thread),
        })) => {
            paused.insert(thread.id, DebuggedThread::from(thread.clone()));
        }
        Some(debug_event::Payload::ThreadContinued(continued)) => {
            paused.remove(&continued.thread_id);
        }
        _ => {}
    }
}

fn thread_paused(thread: &DebuggedThread) -> debug_event::Payload {
    debug_event::Payload::ThreadPaused(proto::ThreadPausedEvent {
        thread: Some(thread.into()),
    })
}

fn error(message: &str) -> debug_event::Payload {
    debug_event::Payload::Error(proto::Error {
        message: message.to_string(),
    })
}

async fn send(
    writer: &mut OwnedWriteHalf,
    sequence_number: i64,
    payload: debug_event::Payload,
) -> Result<(), ()> {
    let event = proto::DebugEvent {
        sequence_number,
        payload: Some(payload),
    };
    writer
        .write_all(&encode_frame(&event.encode_to_vec()))
        .await
        .map_err(|_| ())
}
