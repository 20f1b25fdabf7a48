//! Server orchestrator: one read loop per connection, shared registry.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::events::{EventBus, ServerEvent};
use crate::prompts::{self, Prompt};
use crate::protocol::{Dispatcher, ServerIdentity};
use crate::registry::Registry;
use crate::resources::{self, Resource};
use crate::session::{Session, SessionManager};
use crate::tools::{self, Tool};
use crate::transport::Transport;
use crate::types::{
    error_codes, methods, notifications, DecodeError, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, LogLevel, LogMessageParams, McpError, McpResult, TransportError,
};

/// An MCP server. Cheap to share behind an `Arc`; each call to
/// [`McpServer::serve`] runs one independent session.
pub struct McpServer {
    config: RuntimeConfig,
    registry: Arc<Registry>,
    sessions: Arc<SessionManager>,
    events: Arc<EventBus>,
    dispatcher: Arc<Dispatcher>,
}

impl McpServer {
    pub fn new(config: RuntimeConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let events = Arc::new(EventBus::default());
        let identity = ServerIdentity {
            info: config.server_info(),
            capabilities: config.capabilities.clone(),
            instructions: config.instructions.clone(),
        };
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&events),
            identity,
        ));
        Self {
            config,
            registry,
            sessions: Arc::new(SessionManager::new()),
            events,
            dispatcher,
        }
    }

    /// A server preloaded with the demo tools, runtime resources and prompts.
    pub async fn with_builtins(config: RuntimeConfig) -> McpResult<Self> {
        let server = Self::new(config);
        for tool in tools::builtins()? {
            server.registry.tools.register(tool).await?;
        }
        let runtime_resources =
            resources::runtime::builtins(&server.config, Arc::clone(&server.sessions))?;
        for resource in runtime_resources {
            server.registry.resources.register(resource).await?;
        }
        for prompt in prompts::builtins()? {
            server.registry.prompts.register(prompt).await?;
        }
        let (t, r, p) = server.registry.counts().await;
        tracing::info!("Loaded {t} tools, {r} resources, {p} prompts");
        Ok(server)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Listen for a client notification method on every session.
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        listener: impl Fn(&JsonRpcNotification) + Send + Sync + 'static,
    ) {
        self.dispatcher.notifications().on(method, listener);
    }

    pub async fn register_tool(&self, tool: Tool) -> McpResult<()> {
        self.registry.tools.register(tool).await?;
        self.tools_changed().await;
        Ok(())
    }

    pub async fn replace_tool(&self, tool: Tool) {
        self.registry.tools.replace(tool).await;
        self.tools_changed().await;
    }

    pub async fn unregister_tool(&self, name: &str) -> bool {
        let removed = self.registry.tools.unregister(name).await;
        if removed {
            self.tools_changed().await;
        }
        removed
    }

    pub async fn register_resource(&self, resource: Resource) -> McpResult<()> {
        self.registry.resources.register(resource).await?;
        self.resources_changed().await;
        Ok(())
    }

    pub async fn replace_resource(&self, resource: Resource) {
        self.registry.resources.replace(resource).await;
        self.resources_changed().await;
    }

    pub async fn unregister_resource(&self, uri: &str) -> bool {
        let removed = self.registry.resources.unregister(uri).await;
        if removed {
            self.resources_changed().await;
        }
        removed
    }

    pub async fn register_prompt(&self, prompt: Prompt) -> McpResult<()> {
        self.registry.prompts.register(prompt).await?;
        self.prompts_changed().await;
        Ok(())
    }

    pub async fn replace_prompt(&self, prompt: Prompt) {
        self.registry.prompts.replace(prompt).await;
        self.prompts_changed().await;
    }

    pub async fn unregister_prompt(&self, name: &str) -> bool {
        let removed = self.registry.prompts.unregister(name).await;
        if removed {
            self.prompts_changed().await;
        }
        removed
    }

    async fn tools_changed(&self) {
        if self.config.capabilities.tools_list_changed() {
            self.sessions
                .broadcast(notifications::TOOLS_LIST_CHANGED, None)
                .await;
        }
    }

    async fn resources_changed(&self) {
        if self.config.capabilities.resources_list_changed() {
            self.sessions
                .broadcast(notifications::RESOURCES_LIST_CHANGED, None)
                .await;
        }
    }

    async fn prompts_changed(&self) {
        if self.config.capabilities.prompts_list_changed() {
            self.sessions
                .broadcast(notifications::PROMPTS_LIST_CHANGED, None)
                .await;
        }
    }

    /// Push a log entry to every initialized session.
    ///
    /// Returns the number of sessions reached; zero when the server does not
    /// declare the `logging` capability.
    pub async fn log(
        &self,
        level: LogLevel,
        logger: Option<&str>,
        data: Value,
    ) -> McpResult<usize> {
        if self.config.capabilities.logging.is_none() {
            tracing::debug!("Dropping log notification: logging capability not declared");
            return Ok(0);
        }
        let params = serde_json::to_value(LogMessageParams {
            level,
            logger: logger.map(str::to_string),
            data,
        })?;
        Ok(self
            .sessions
            .broadcast(notifications::MESSAGE, Some(params))
            .await)
    }

    /// Ping a connected client and wait for its answer.
    pub async fn ping_client(&self, session_id: &str) -> McpResult<()> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| McpError::InvalidRequest(format!("Unknown session {session_id}")))?;
        session
            .request(methods::PING, None, self.config.request_timeout)
            .await
            .map(|_| ())
    }

    /// Serve one connection until the peer disconnects.
    pub async fn serve(&self, transport: Arc<dyn Transport>) -> McpResult<()> {
        self.serve_session(Uuid::new_v4().to_string(), transport)
            .await
    }

    /// Serve one connection under a caller-chosen session id.
    pub async fn serve_session(
        &self,
        id: String,
        transport: Arc<dyn Transport>,
    ) -> McpResult<()> {
        let session = Arc::new(Session::new(
            id.clone(),
            transport,
            self.config.supported_versions.clone(),
        ));
        self.sessions.insert(Arc::clone(&session)).await;
        tracing::info!("Session {id} opened");

        let outcome = self.read_loop(&session).await;

        session.close().await;
        self.sessions.remove(&id).await;
        self.events.emit(ServerEvent::Disconnected {
            session: id.clone(),
        });
        match &outcome {
            Ok(()) => tracing::info!("Session {id} closed"),
            Err(e) => tracing::error!("Session {id} torn down: {e}"),
        }
        outcome
    }

    async fn read_loop(&self, session: &Arc<Session>) -> McpResult<()> {
        loop {
            let message = match session.transport().receive().await {
                Ok(message) => message,
                Err(TransportError::Decode(e)) => {
                    if self.recover_from_decode_error(session, e.clone()).await {
                        continue;
                    }
                    return Err(TransportError::Decode(e).into());
                }
                Err(TransportError::Disconnected | TransportError::Closed) => return Ok(()),
                Err(e) => {
                    self.emit_error(session, error_codes::INTERNAL_ERROR, e.to_string());
                    return Err(e.into());
                }
            };

            match message {
                JsonRpcMessage::Request(request) if request.method == methods::INITIALIZE => {
                    self.handshake(session, request).await;
                }
                JsonRpcMessage::Request(request) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let session = Arc::clone(session);
                    tokio::spawn(async move {
                        let reply = dispatcher.handle_request(&session, request).await;
                        if let Err(e) = session.send(&reply).await {
                            tracing::warn!("Session {}: failed to send reply: {e}", session.id());
                        }
                    });
                }
                JsonRpcMessage::Notification(notification) => {
                    if let Err(e) = session.check_dispatch(&notification.method).await {
                        tracing::warn!(
                            "Session {}: dropping notification {}: {e}",
                            session.id(),
                            notification.method
                        );
                        self.emit_error(session, e.code(), e.to_string());
                        continue;
                    }
                    self.dispatcher
                        .handle_notification(session, notification)
                        .await;
                }
                response => self.dispatcher.handle_response(session, response).await,
            }
        }
    }

    /// Run `initialize` inline so no later request is read before the
    /// handshake has completed.
    async fn handshake(&self, session: &Arc<Session>, request: JsonRpcRequest) {
        let reply = self.dispatcher.handle_request(session, request).await;
        let accepted = matches!(reply, JsonRpcMessage::Response(_));

        if let Err(e) = session.send(&reply).await {
            tracing::warn!("Session {}: failed to send handshake reply: {e}", session.id());
            if accepted {
                session.abort_handshake().await;
            }
            return;
        }
        if !accepted {
            return;
        }

        match session.complete_handshake().await {
            Ok(negotiated) => self.events.emit(ServerEvent::Initialized {
                session: session.id().to_string(),
                client: negotiated.client_info,
            }),
            Err(e) => tracing::warn!("Session {}: handshake did not complete: {e}", session.id()),
        }
    }

    /// Apply the bad-frame policy. Returns `false` when the session must be
    /// torn down.
    async fn recover_from_decode_error(&self, session: &Session, error: DecodeError) -> bool {
        if let Some(id) = error.reply_id() {
            tracing::warn!("Session {}: malformed request {id}: {error}", session.id());
            let reply: JsonRpcMessage = error.to_json_rpc_error(id.clone()).into();
            if let Err(e) = session.send(&reply).await {
                tracing::warn!("Session {}: failed to send parse error: {e}", session.id());
            }
            return true;
        }

        if error.is_unrecoverable() {
            tracing::error!("Session {}: unrecoverable frame: {error}", session.id());
            self.emit_error(session, error.code(), error.to_string());
            return false;
        }

        if let (Some(id), false) = (error.id.as_ref(), error.has_method) {
            let outcome = Err(McpError::Transport(TransportError::Decode(error.clone())));
            if session.pending().complete(id, outcome).await {
                return true;
            }
        }

        tracing::warn!("Session {}: dropping malformed frame: {error}", session.id());
        self.emit_error(session, error.code(), error.to_string());
        true
    }

    fn emit_error(&self, session: &Session, code: i32, message: String) {
        self.events.emit(ServerEvent::Error {
            session: session.id().to_string(),
            code,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builtins_are_registered_in_order() {
        let server = McpServer::with_builtins(RuntimeConfig::default()).await.unwrap();
        let tools: Vec<String> = server
            .registry()
            .tools
            .list_tools()
            .await
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(tools, vec!["echo", "add", "uuid"]);
        assert_eq!(server.registry().counts().await, (3, 2, 2));
    }

    #[tokio::test]
    async fn log_without_sessions_reaches_nobody() {
        let server = McpServer::new(RuntimeConfig::default());
        let reached = server
            .log(LogLevel::Info, Some("test"), Value::String("hello".into()))
            .await
            .unwrap();
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn duplicate_registration_is_an_error() {
        let server = McpServer::with_builtins(RuntimeConfig::default()).await.unwrap();
        let err = server.register_tool(tools::echo::tool().unwrap()).await.unwrap_err();
        assert_eq!(err.code(), -32600);
        assert!(server.unregister_tool("echo").await);
        assert!(!server.unregister_tool("echo").await);
    }
}
