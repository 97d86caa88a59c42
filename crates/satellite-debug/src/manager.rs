use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use satellite_config::SatelliteConfig;
use satellite_core::poison::lock;
use satellite_larky_debugger::ScriptEvaluator;
use satellite_larky_gateway::{GatewayTransport, LarkyGatewayClient};

use crate::{
    error::DebugManagerError,
    session::{DebugSession, SessionInfo, SessionSettings},
};

/// Registry of debug sessions; at most one is active at a time.
pub struct DebugManager {
    gateway: LarkyGatewayClient,
    evaluator: Arc<dyn ScriptEvaluator>,
    settings: SessionSettings,
    sessions: Mutex<HashMap<String, Arc<DebugSession>>>,
}

impl DebugManager {
    /// Manager talking gRPC to the configured gateway.
    pub fn new(config: &SatelliteConfig, evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        Self::with_gateway(
            LarkyGatewayClient::connect_lazy(&config.gateway.host, config.gateway.port),
            evaluator,
            SessionSettings::from(config),
        )
    }

    pub fn with_transport(
        transport: Arc<dyn GatewayTransport>,
        evaluator: Arc<dyn ScriptEvaluator>,
        settings: SessionSettings,
    ) -> Self {
        Self::with_gateway(LarkyGatewayClient::new(transport), evaluator, settings)
    }

    fn with_gateway(
        gateway: LarkyGatewayClient,
        evaluator: Arc<dyn ScriptEvaluator>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            gateway,
            evaluator,
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create, register and start a session.
    pub fn new_session(
        &self,
        org_id: impl Into<String>,
        vault: impl Into<String>,
    ) -> Result<Arc<DebugSession>, DebugManagerError> {
        let session = {
            let mut sessions = lock(&self.sessions, "DebugManager.new_session");
            if !sessions.is_empty() {
                return Err(DebugManagerError::DebugSessionLimitExceeded);
            }
            let session = DebugSession::new(
                org_id,
                vault,
                self.gateway.clone(),
                self.evaluator.clone(),
                self.settings.clone(),
            );
            sessions.insert(session.id().to_owned(), session.clone());
            session
        };

        session.start();
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> Result<Arc<DebugSession>, DebugManagerError> {
        lock(&self.sessions, "DebugManager.get_session")
            .get(id)
            .cloned()
            .ok_or_else(|| DebugManagerError::DebugSessionNotFound(id.to_owned()))
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        lock(&self.sessions, "DebugManager.sessions")
            .values()
            .map(|session| session.info())
            .collect()
    }

    /// Stop the session, then forget it.
    pub async fn delete_session(&self, id: &str) -> Result<(), DebugManagerError> {
        let session = self.get_session(id)?;
        session.close().await;
        lock(&self.sessions, "DebugManager.delete_session").remove(id);
        tracing::debug!(target: "satellite.debug", session_id = %id, "deleted debug session");
        Ok(())
    }

    /// Stop and forget every session.
    pub async fn stop_all(&self) {
        let sessions: Vec<_> = lock(&self.sessions, "DebugManager.stop_all")
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in sessions {
            session.close().await;
        }
    }
}
