//! Per-connection session state and the table of live sessions.

pub mod manager;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::protocol::negotiation::{NegotiatedSession, Negotiator, SessionPhase};
use crate::protocol::pending::PendingRequests;
use crate::transport::Transport;
use crate::types::{
    Implementation, InitializeParams, InitializeResult, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, McpError, McpResult, ServerCapabilities,
};

pub use manager::SessionManager;

/// One accepted connection, from the server's point of view.
pub struct Session {
    id: String,
    transport: Arc<dyn Transport>,
    negotiator: Mutex<Negotiator>,
    pending: PendingRequests,
    client_ready: AtomicBool,
    created_at: DateTime<Utc>,
}

/// Serializable view of a session for listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<Implementation>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        transport: Arc<dyn Transport>,
        supported_versions: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            transport,
            negotiator: Mutex::new(Negotiator::new(supported_versions)),
            pending: PendingRequests::new(),
            client_ready: AtomicBool::new(false),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub async fn phase(&self) -> SessionPhase {
        self.negotiator.lock().await.phase()
    }

    pub async fn is_initialized(&self) -> bool {
        self.negotiator.lock().await.is_initialized()
    }

    pub async fn negotiated(&self) -> Option<NegotiatedSession> {
        self.negotiator.lock().await.negotiated().cloned()
    }

    pub async fn check_dispatch(&self, method: &str) -> McpResult<()> {
        self.negotiator.lock().await.check_dispatch(method)
    }

    pub async fn begin_handshake(
        &self,
        params: InitializeParams,
        server_info: Implementation,
        capabilities: ServerCapabilities,
        instructions: Option<String>,
    ) -> McpResult<InitializeResult> {
        self.negotiator
            .lock()
            .await
            .begin_server_handshake(params, server_info, capabilities, instructions)
    }

    /// The handshake result is on the wire; the session is now usable.
    pub async fn complete_handshake(&self) -> McpResult<NegotiatedSession> {
        self.negotiator
            .lock()
            .await
            .complete_server_handshake()
            .cloned()
    }

    pub async fn abort_handshake(&self) {
        self.negotiator.lock().await.abort_handshake();
    }

    /// Record the client's `notifications/initialized`.
    pub fn mark_client_ready(&self) {
        self.client_ready.store(true, Ordering::SeqCst);
    }

    pub fn client_ready(&self) -> bool {
        self.client_ready.load(Ordering::SeqCst)
    }

    pub async fn send(&self, message: &JsonRpcMessage) -> McpResult<()> {
        if self.negotiator.lock().await.is_closed() {
            return Err(McpError::SessionClosed);
        }
        self.transport.send(message).await?;
        Ok(())
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.send(&JsonRpcNotification::new(method, params).into())
            .await
    }

    /// Send a request to the client and wait for its answer.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpResult<Value> {
        let id = self.pending.next_id();
        let rx = self.pending.register(id.clone(), method).await?;
        let request = JsonRpcRequest::new(id.clone(), method, params);
        if let Err(e) = self.send(&request.into()).await {
            self.pending.abandon(&id).await;
            return Err(e);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Disconnected),
            Err(_) => {
                self.pending.abandon(&id).await;
                Err(McpError::Timeout {
                    id,
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Enter the closed phase once the connection is gone and release the
    /// transport. Requests still waiting on the client fail as disconnected.
    /// Idempotent.
    pub async fn close(&self) {
        self.negotiator.lock().await.close();
        let failed = self.pending.fail_all(|| McpError::Disconnected).await;
        if failed > 0 {
            tracing::warn!("Session {}: disconnected with {failed} request(s) in flight", self.id);
        }
        if let Err(e) = self.transport.close().await {
            tracing::debug!("Session {}: error closing transport: {e}", self.id);
        }
    }

    pub async fn summary(&self) -> SessionSummary {
        let negotiator = self.negotiator.lock().await;
        let negotiated = negotiator.negotiated();
        SessionSummary {
            id: self.id.clone(),
            phase: negotiator.phase().to_string(),
            protocol_version: negotiated.map(|n| n.protocol_version.clone()),
            client: negotiated.and_then(|n| n.client_info.clone()),
            created_at: self.created_at,
        }
    }
}
