//! MCP capability negotiation: the per-session handshake state machine.

use crate::types::{
    methods, ClientCapabilities, Implementation, InitializeParams, InitializeResult, McpError,
    McpResult, ServerCapabilities,
};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Initialized,
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Uninitialized => "uninitialized",
            SessionPhase::Initializing => "initializing",
            SessionPhase::Initialized => "initialized",
            SessionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What both sides agreed on once the handshake completed.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedSession {
    pub protocol_version: String,
    pub client_capabilities: ClientCapabilities,
    pub client_info: Option<Implementation>,
    pub server_capabilities: ServerCapabilities,
    pub server_info: Implementation,
}

/// Drives one session through `Uninitialized → Initializing → Initialized → Closed`.
///
/// The negotiated values are written once, when the handshake completes, and
/// never change afterwards.
#[derive(Debug)]
pub struct Negotiator {
    phase: SessionPhase,
    supported_versions: Vec<String>,
    negotiated: Option<NegotiatedSession>,
    pending: Option<NegotiatedSession>,
}

impl Negotiator {
    pub fn new(supported_versions: Vec<String>) -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            supported_versions,
            negotiated: None,
            pending: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_initialized(&self) -> bool {
        self.phase == SessionPhase::Initialized
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    pub fn negotiated(&self) -> Option<&NegotiatedSession> {
        self.negotiated.as_ref()
    }

    pub fn supports(&self, version: &str) -> bool {
        self.supported_versions.iter().any(|v| v == version)
    }

    /// Gate every inbound method on the session phase.
    ///
    /// Only the handshake may run before the session is initialized, and
    /// nothing runs once it is closed.
    pub fn check_dispatch(&self, method: &str) -> McpResult<()> {
        match self.phase {
            SessionPhase::Closed => Err(McpError::SessionClosed),
            SessionPhase::Initialized => {
                if method == methods::INITIALIZE {
                    Err(McpError::InvalidRequest(
                        "Session is already initialized".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
            SessionPhase::Uninitialized if method == methods::INITIALIZE => Ok(()),
            SessionPhase::Initializing if method == methods::INITIALIZE => Err(
                McpError::InvalidRequest("Handshake already in progress".to_string()),
            ),
            phase => Err(McpError::InvalidRequest(format!(
                "Method '{method}' is not allowed while the session is {phase}"
            ))),
        }
    }

    /// Server role: validate the client's handshake and build the result.
    ///
    /// Moves to `Initializing`; the caller must call
    /// [`Negotiator::complete_server_handshake`] once the result is on the wire.
    /// On rejection the phase returns to `Uninitialized` so the peer may retry.
    pub fn begin_server_handshake(
        &mut self,
        params: InitializeParams,
        server_info: Implementation,
        capabilities: ServerCapabilities,
        instructions: Option<String>,
    ) -> McpResult<InitializeResult> {
        self.check_dispatch(methods::INITIALIZE)?;
        self.phase = SessionPhase::Initializing;

        if !self.supports(&params.protocol_version) {
            self.phase = SessionPhase::Uninitialized;
            tracing::warn!(
                "Client requested unsupported protocol version {} (supported: {})",
                params.protocol_version,
                self.supported_versions.join(", ")
            );
            return Err(McpError::InvalidParams(format!(
                "Unsupported protocol version '{}'; supported: {}",
                params.protocol_version,
                self.supported_versions.join(", ")
            )));
        }

        tracing::info!(
            "Handshake from client: {} v{} (protocol {})",
            params.client_info.name,
            params.client_info.version,
            params.protocol_version
        );

        let result = InitializeResult {
            protocol_version: params.protocol_version.clone(),
            capabilities: capabilities.clone(),
            server_info: server_info.clone(),
            instructions,
        };
        self.pending = Some(NegotiatedSession {
            protocol_version: params.protocol_version,
            client_capabilities: params.capabilities,
            client_info: Some(params.client_info),
            server_capabilities: capabilities,
            server_info,
        });
        Ok(result)
    }

    /// Server role: the handshake result has been sent.
    pub fn complete_server_handshake(&mut self) -> McpResult<&NegotiatedSession> {
        self.finish()
    }

    /// Client role: the handshake request is about to be sent.
    pub fn begin_client_handshake(&mut self) -> McpResult<()> {
        self.check_dispatch(methods::INITIALIZE)?;
        self.phase = SessionPhase::Initializing;
        Ok(())
    }

    /// Client role: the handshake result arrived.
    pub fn complete_client_handshake(
        &mut self,
        result: InitializeResult,
    ) -> McpResult<&NegotiatedSession> {
        if self.phase != SessionPhase::Initializing {
            return Err(McpError::InvalidRequest(format!(
                "Unexpected handshake result while {}",
                self.phase
            )));
        }
        if !self.supports(&result.protocol_version) {
            self.phase = SessionPhase::Uninitialized;
            return Err(McpError::InvalidParams(format!(
                "Server chose unsupported protocol version '{}'",
                result.protocol_version
            )));
        }
        self.pending = Some(NegotiatedSession {
            protocol_version: result.protocol_version,
            client_capabilities: ClientCapabilities::default(),
            client_info: None,
            server_capabilities: result.capabilities,
            server_info: result.server_info,
        });
        self.finish()
    }

    /// The handshake did not complete (send failure, remote error).
    pub fn abort_handshake(&mut self) {
        if self.phase == SessionPhase::Initializing {
            self.phase = SessionPhase::Uninitialized;
            self.pending = None;
        }
    }

    /// Enter the terminal phase. Idempotent.
    pub fn close(&mut self) {
        if self.phase != SessionPhase::Closed {
            tracing::debug!("Session phase {} -> closed", self.phase);
        }
        self.phase = SessionPhase::Closed;
        self.pending = None;
    }

    fn finish(&mut self) -> McpResult<&NegotiatedSession> {
        if self.phase != SessionPhase::Initializing {
            return Err(McpError::InvalidRequest(format!(
                "Cannot complete handshake while {}",
                self.phase
            )));
        }
        let negotiated = self
            .pending
            .take()
            .ok_or_else(|| McpError::InternalError("No handshake in progress".to_string()))?;
        self.phase = SessionPhase::Initialized;
        tracing::info!("MCP handshake complete (protocol {})", negotiated.protocol_version);
        Ok(self.negotiated.insert(negotiated))
    }
}
