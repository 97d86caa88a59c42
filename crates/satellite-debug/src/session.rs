use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
};

use satellite_config::SatelliteConfig;
use satellite_core::{poison::lock, Outcome, Pending, PendingResult, ProxyRequest};
use satellite_larky_debugger::{
    Breakpoint, DebugServerAddr, DebuggedThread, DebuggerEvent, LarkyDebugger,
    LarkyDebuggerConfig, ScriptEvaluator, StackFrame, Stepping, ThreadId, Value, ValueId,
};
use satellite_larky_gateway::{GatewaySession, LarkyGatewayClient, SessionAnnouncement};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebugSessionState {
    /// Waiting for the gateway to hand over the script and message.
    Initializing,
    Running,
    Completed,
    Error,
}

impl DebugSessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            DebugSessionState::Initializing => "INITIALIZING",
            DebugSessionState::Running => "RUNNING",
            DebugSessionState::Completed => "COMPLETED",
            DebugSessionState::Error => "ERROR",
        }
    }
}

impl fmt::Display for DebugSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub org_id: String,
    pub vault: String,
    pub state: DebugSessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Where and how sessions reach the debug server.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub debug_server: DebugServerAddr,
    pub debugger: LarkyDebuggerConfig,
}

impl From<&SatelliteConfig> for SessionSettings {
    fn from(config: &SatelliteConfig) -> Self {
        let server = &config.debug_server;
        Self {
            debug_server: DebugServerAddr::new(server.host.clone(), server.port),
            debugger: LarkyDebuggerConfig {
                connect_attempts: server.connect_attempts,
                connect_backoff: server.connect_backoff(),
                stop_grace: server.stop_grace(),
                ..LarkyDebuggerConfig::default()
            },
        }
    }
}

/// One debugging run: the gateway stream that supplies the script and
/// receives its result, plus the debugger driving the script in between.
pub struct DebugSession {
    id: String,
    org_id: String,
    vault: String,
    settings: SessionSettings,
    gateway: LarkyGatewayClient,
    evaluator: Arc<dyn ScriptEvaluator>,
    debugger: OnceLock<LarkyDebugger>,
    error: Mutex<Option<String>>,
    request_ready: Pending<ProxyRequest>,
    result: PendingResult,
    gateway_session: Mutex<Option<GatewaySession>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    changes: watch::Sender<()>,
}

impl fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DebugSession {
    pub fn new(
        org_id: impl Into<String>,
        vault: impl Into<String>,
        gateway: LarkyGatewayClient,
        evaluator: Arc<dyn ScriptEvaluator>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            org_id: org_id.into(),
            vault: vault.into(),
            settings,
            gateway,
            evaluator,
            debugger: OnceLock::new(),
            error: Mutex::new(None),
            request_ready: Pending::new(),
            result: PendingResult::new(),
            gateway_session: Mutex::new(None),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            changes: watch::channel(()).0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    pub fn vault(&self) -> &str {
        &self.vault
    }

    /// The script outcome, as reported back to the gateway.
    pub fn result(&self) -> &PendingResult {
        &self.result
    }

    pub fn error(&self) -> Option<String> {
        lock(&self.error, "DebugSession.error").clone()
    }

    /// Derived from what has happened so far; never stored.
    pub fn state(&self) -> DebugSessionState {
        if lock(&self.error, "DebugSession.state").is_some() {
            return DebugSessionState::Error;
        }
        match self.debugger.get() {
            None => DebugSessionState::Initializing,
            Some(debugger) if debugger.completed() => DebugSessionState::Completed,
            Some(_) => DebugSessionState::Running,
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            org_id: self.org_id.clone(),
            vault: self.vault.clone(),
            state: self.state(),
            error: self.error(),
        }
    }

    /// Open the gateway stream and start waiting for the proxy request.
    /// Calling it again has no effect.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            target: "satellite.debug",
            session_id = %self.id,
            org_id = %self.org_id,
            vault = %self.vault,
            "starting debug session"
        );

        let gateway_session = self.gateway.new_session(
            SessionAnnouncement {
                session_id: self.id.clone(),
                org_id: self.org_id.clone(),
                vault: self.vault.clone(),
            },
            self.request_ready.clone(),
            self.result.clone(),
        );
        *lock(&self.gateway_session, "DebugSession.start") = Some(gateway_session);

        tokio::spawn(self.clone().supervise());
    }

    /// Wait until the session leaves `INITIALIZING` (or is stopped while still
    /// in it) and return the state it reached.
    pub async fn wait_started(&self) -> DebugSessionState {
        let mut changes = self.changes.subscribe();
        loop {
            let state = self.state();
            if state != DebugSessionState::Initializing || self.shutdown.is_cancelled() {
                return state;
            }
            if changes.changed().await.is_err() {
                return self.state();
            }
        }
    }

    /// Stop the debugger (cancelling a result that is still pending) and
    /// close the gateway stream. Does nothing once the session completed.
    pub async fn stop(&self) {
        if self.state() == DebugSessionState::Completed {
            return;
        }
        tracing::info!(target: "satellite.debug", session_id = %self.id, "stopping debug session");
        self.shutdown.cancel();

        match self.debugger.get() {
            Some(debugger) => debugger.stop().await,
            None => {
                self.result.cancel();
                self.request_ready.cancel();
            }
        }

        if let Some(gateway_session) = lock(&self.gateway_session, "DebugSession.stop").as_ref() {
            gateway_session.close();
        }
        self.changes.send_replace(());
    }

    /// Stop the session, then tear down its gateway stream and wait for it
    /// to exit. Unlike [`stop`](Self::stop) this also applies to a session
    /// that already completed.
    pub async fn close(&self) {
        self.stop().await;
        let gateway_session = lock(&self.gateway_session, "DebugSession.close").take();
        if let Some(gateway_session) = gateway_session {
            gateway_session.close();
            gateway_session.join().await;
        }
    }

    pub fn threads(&self) -> Result<Vec<DebuggedThread>, SessionError> {
        Ok(self.running_debugger()?.get_threads()?)
    }

    pub async fn list_frames(&self, thread_id: ThreadId) -> Result<Vec<StackFrame>, SessionError> {
        Ok(self.running_debugger()?.list_frames(thread_id).await?)
    }

    pub async fn set_breakpoints(&self, breakpoints: &[Breakpoint]) -> Result<(), SessionError> {
        Ok(self.running_debugger()?.set_breakpoints(breakpoints).await?)
    }

    pub async fn pause_thread(&self, thread_id: ThreadId) -> Result<(), SessionError> {
        Ok(self.running_debugger()?.pause_thread(thread_id).await?)
    }

    pub async fn continue_execution(
        &self,
        thread_id: ThreadId,
        stepping: Stepping,
    ) -> Result<(), SessionError> {
        Ok(self
            .running_debugger()?
            .continue_execution(thread_id, stepping)
            .await?)
    }

    pub async fn get_children(
        &self,
        thread_id: ThreadId,
        value_id: ValueId,
    ) -> Result<Vec<Value>, SessionError> {
        Ok(self
            .running_debugger()?
            .get_children(thread_id, value_id)
            .await?)
    }

    pub async fn evaluate(&self, thread_id: ThreadId, statement: &str) -> Result<Value, SessionError> {
        Ok(self.running_debugger()?.evaluate(thread_id, statement).await?)
    }

    pub fn subscribe_events(&self) -> Result<broadcast::Receiver<DebuggerEvent>, SessionError> {
        Ok(self.running_debugger()?.subscribe_events())
    }

    fn running_debugger(&self) -> Result<&LarkyDebugger, SessionError> {
        let state = self.state();
        if state != DebugSessionState::Running {
            return Err(SessionError::NotRunning { state });
        }
        self.debugger.get().ok_or(SessionError::NotRunning {
            state: DebugSessionState::Initializing,
        })
    }

    fn record_error(&self, message: String) {
        tracing::warn!(target: "satellite.debug", session_id = %self.id, error = %message, "debug session failed");
        lock(&self.error, "DebugSession.record_error").get_or_insert(message);
        self.changes.send_replace(());
    }

    async fn supervise(self: Arc<Self>) {
        let request = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            outcome = self.request_ready.wait() => outcome,
        };
        let request = match request {
            Outcome::Ready(request) => request,
            Outcome::Failed(message) => {
                self.record_error(message);
                return;
            }
            Outcome::Cancelled => return,
        };

        tracing::debug!(
            target: "satellite.debug",
            session_id = %self.id,
            addr = %self.settings.debug_server,
            "proxy request received; connecting to debug server"
        );
        let started = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            started = LarkyDebugger::start(
                request,
                self.settings.debug_server.clone(),
                self.result.clone(),
                self.evaluator.clone(),
                self.settings.debugger.clone(),
            ) => started,
        };

        match started {
            Ok(debugger) => {
                let _ = self.debugger.set(debugger.clone());
                self.changes.send_replace(());
                // Stopped while connecting; `stop()` did not see this debugger.
                if self.shutdown.is_cancelled() {
                    debugger.stop().await;
                    return;
                }
            }
            Err(err) => {
                let message = err.to_string();
                self.record_error(message.clone());
                self.result.fail(message);
                return;
            }
        }

        if let Outcome::Failed(message) = self.result.wait().await {
            self.record_error(message);
        } else {
            self.changes.send_replace(());
        }
        tracing::debug!(target: "satellite.debug", session_id = %self.id, state = %self.state(), "debug session finished");
    }
}
