//! Client orchestrator: handshake, typed requests, timeouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::RuntimeConfig;
use crate::protocol::{
    codec, NegotiatedSession, Negotiator, NotificationRouter, PendingRequests, SessionPhase,
};
use crate::transport::Transport;
use crate::types::{
    methods, notifications, ClientCapabilities, DecodeError, Implementation, InitializeParams,
    InitializeResult, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    McpError, McpResult, PromptDefinition, PromptGetResult, PromptListResult, ReadResourceResult,
    ResourceDefinition, ResourceListResult, ServerCapabilities, ToolCallResult, ToolDefinition,
    ToolListResult, TransportError,
};

/// The client side of one MCP connection.
///
/// A background task reads from the transport and routes responses to
/// waiting callers, so any number of requests may be in flight at once.
pub struct McpClient {
    transport: Arc<dyn Transport>,
    pending: Arc<PendingRequests>,
    negotiator: Arc<Mutex<Negotiator>>,
    notifications: Arc<NotificationRouter>,
    client_info: Implementation,
    preferred_version: String,
    timeout: Duration,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    /// Attach to a transport and start reading. Call [`McpClient::initialize`]
    /// before anything else.
    pub fn connect(transport: Arc<dyn Transport>, config: &RuntimeConfig) -> Self {
        let pending = Arc::new(PendingRequests::new());
        let negotiator = Arc::new(Mutex::new(Negotiator::new(config.supported_versions.clone())));
        let notifications = Arc::new(NotificationRouter::new());

        let reader = tokio::spawn(read_loop(
            Arc::clone(&transport),
            Arc::clone(&pending),
            Arc::clone(&negotiator),
            Arc::clone(&notifications),
        ));

        Self {
            transport,
            pending,
            negotiator,
            notifications,
            client_info: Implementation::new(
                format!("{}-client", config.server_name),
                &config.server_version,
            ),
            preferred_version: config.preferred_version().to_string(),
            timeout: config.request_timeout,
            reader: std::sync::Mutex::new(Some(reader)),
        }
    }

    pub fn with_client_info(mut self, info: Implementation) -> Self {
        self.client_info = info;
        self
    }

    pub async fn phase(&self) -> SessionPhase {
        self.negotiator.lock().await.phase()
    }

    pub async fn negotiated(&self) -> Option<NegotiatedSession> {
        self.negotiator.lock().await.negotiated().cloned()
    }

    pub async fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.negotiated().await.map(|n| n.server_capabilities)
    }

    /// Register a listener for a server notification method.
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        listener: impl Fn(&JsonRpcNotification) + Send + Sync + 'static,
    ) {
        self.notifications.on(method, listener);
    }

    /// Perform the handshake. On failure the client stays usable for a retry.
    pub async fn initialize(&self) -> McpResult<NegotiatedSession> {
        self.negotiator.lock().await.begin_client_handshake()?;

        let params = InitializeParams {
            protocol_version: self.preferred_version.clone(),
            capabilities: ClientCapabilities::default(),
            client_info: self.client_info.clone(),
        };
        let outcome = match serde_json::to_value(params) {
            Ok(params) => self.send_request(methods::INITIALIZE, Some(params), self.timeout).await,
            Err(e) => Err(e.into()),
        };
        let result = outcome.and_then(|value| {
            serde_json::from_value::<InitializeResult>(value)
                .map_err(|e| McpError::InvalidParams(format!("Malformed initialize result: {e}")))
        });

        let negotiated = {
            let mut negotiator = self.negotiator.lock().await;
            match result {
                Ok(result) => negotiator.complete_client_handshake(result)?.clone(),
                Err(e) => {
                    negotiator.abort_handshake();
                    return Err(e);
                }
            }
        };

        self.notify(notifications::INITIALIZED, None).await?;
        tracing::info!(
            "Connected to {} v{} (protocol {})",
            negotiated.server_info.name,
            negotiated.server_info.version,
            negotiated.protocol_version
        );
        Ok(negotiated)
    }

    pub async fn ping(&self) -> McpResult<()> {
        self.request(methods::PING, None).await.map(|_| ())
    }

    pub async fn list_tools(&self) -> McpResult<Vec<ToolDefinition>> {
        let result: ToolListResult = self.typed_request(methods::TOOLS_LIST, None).await?;
        Ok(result.tools)
    }

    /// Call a tool. An error-flagged result is returned as a value; use
    /// [`ToolCallResult::into_content`] to treat it as an error.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<ToolCallResult> {
        self.typed_request(
            methods::TOOLS_CALL,
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    pub async fn list_resources(&self) -> McpResult<Vec<ResourceDefinition>> {
        let result: ResourceListResult = self.typed_request(methods::RESOURCES_LIST, None).await?;
        Ok(result.resources)
    }

    pub async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        self.typed_request(methods::RESOURCES_READ, Some(json!({ "uri": uri })))
            .await
    }

    pub async fn list_prompts(&self) -> McpResult<Vec<PromptDefinition>> {
        let result: PromptListResult = self.typed_request(methods::PROMPTS_LIST, None).await?;
        Ok(result.prompts)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> McpResult<PromptGetResult> {
        self.typed_request(
            methods::PROMPTS_GET,
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    /// Send a request with the configured timeout.
    pub async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        self.request_with_timeout(method, params, self.timeout).await
    }

    /// Send a request and wait at most `timeout` for its response.
    ///
    /// On timeout the request is forgotten; a response arriving later is
    /// dropped.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpResult<Value> {
        if method == methods::INITIALIZE {
            return Err(McpError::InvalidRequest(
                "Use McpClient::initialize for the handshake".to_string(),
            ));
        }
        self.negotiator.lock().await.check_dispatch(method)?;
        self.send_request(method, params, timeout).await
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        if self.negotiator.lock().await.is_closed() {
            return Err(McpError::SessionClosed);
        }
        self.transport
            .send(&JsonRpcNotification::new(method, params).into())
            .await?;
        Ok(())
    }

    /// Stop reading, fail everything in flight and close the transport.
    /// Idempotent.
    pub async fn close(&self) -> McpResult<()> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
        self.negotiator.lock().await.close();
        self.pending.fail_all(|| McpError::SessionClosed).await;
        self.transport.close().await?;
        Ok(())
    }

    async fn typed_request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<T> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::InternalError(format!("Malformed {method} result: {e}")))
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpResult<Value> {
        let id = self.pending.next_id();
        let rx = self.pending.register(id.clone(), method).await?;

        let request: JsonRpcMessage = JsonRpcRequest::new(id.clone(), method, params).into();
        if let Err(e) = self.transport.send(&request).await {
            self.pending.abandon(&id).await;
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Disconnected),
            Err(_) => {
                self.pending.abandon(&id).await;
                tracing::warn!("Request {id} ({method}) timed out after {}ms", timeout.as_millis());
                Err(McpError::Timeout {
                    id,
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some(reader) = self
            .reader
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            reader.abort();
        }
    }
}

async fn read_loop(
    transport: Arc<dyn Transport>,
    pending: Arc<PendingRequests>,
    negotiator: Arc<Mutex<Negotiator>>,
    notifications: Arc<NotificationRouter>,
) {
    loop {
        match transport.receive().await {
            Ok(message @ (JsonRpcMessage::Response(_) | JsonRpcMessage::Error(_))) => {
                pending.resolve(message).await;
            }
            Ok(JsonRpcMessage::Notification(notification)) => {
                if let Err(e) = negotiator.lock().await.check_dispatch(&notification.method) {
                    tracing::warn!("Dropping notification {}: {e}", notification.method);
                    continue;
                }
                let delivered = notifications.dispatch(&notification);
                tracing::debug!(
                    "Notification {} delivered to {delivered} listener(s)",
                    notification.method
                );
            }
            Ok(JsonRpcMessage::Request(request)) => {
                let gate = negotiator.lock().await.check_dispatch(&request.method);
                answer_server_request(transport.as_ref(), request, gate).await;
            }
            Err(TransportError::Decode(e)) => {
                if !recover_from_decode_error(transport.as_ref(), &pending, e).await {
                    break;
                }
            }
            Err(TransportError::Disconnected | TransportError::Closed) => break,
            Err(e) => {
                tracing::error!("Client transport failed: {e}");
                break;
            }
        }
    }

    negotiator.lock().await.close();
    let failed = pending.fail_all(|| McpError::Disconnected).await;
    if failed > 0 {
        tracing::warn!("Disconnected with {failed} request(s) in flight");
    }
    if let Err(e) = transport.close().await {
        tracing::debug!("Ignoring error while closing client transport: {e}");
    }
}

/// Servers may ping the client once the handshake is done; nothing else is
/// supported.
async fn answer_server_request(
    transport: &dyn Transport,
    request: JsonRpcRequest,
    gate: McpResult<()>,
) {
    let reply: JsonRpcMessage = match gate {
        Err(e) => e.to_json_rpc_error(request.id).into(),
        Ok(()) if request.method == methods::PING => {
            JsonRpcResponse::new(request.id, codec::empty_result()).into()
        }
        Ok(()) => McpError::MethodNotFound(request.method)
            .to_json_rpc_error(request.id)
            .into(),
    };
    if let Err(e) = transport.send(&reply).await {
        tracing::warn!("Failed to answer server request: {e}");
    }
}

/// Returns `false` when the connection must be dropped.
async fn recover_from_decode_error(
    transport: &dyn Transport,
    pending: &PendingRequests,
    error: DecodeError,
) -> bool {
    if let Some(id) = error.reply_id() {
        let reply: JsonRpcMessage = error.to_json_rpc_error(id.clone()).into();
        if let Err(e) = transport.send(&reply).await {
            tracing::warn!("Failed to reject malformed server request: {e}");
        }
        return true;
    }
    if error.is_unrecoverable() {
        tracing::error!("Unrecoverable frame from server: {error}");
        return false;
    }
    if let Some(id) = error.id.clone() {
        let outcome = Err(McpError::Transport(TransportError::Decode(error)));
        pending.complete(&id, outcome).await;
        return true;
    }
    tracing::warn!("Dropping malformed notification from server: {error}");
    true
}
