//! Server-role routing of inbound messages, plus per-method notification
//! listeners shared by both roles.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::{Map, Value};

use super::codec;
use crate::events::{EventBus, ServerEvent};
use crate::registry::Registry;
use crate::session::Session;
use crate::types::{
    methods, notifications, parse_params, Implementation, InitializeParams, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListParams, McpError, McpResult,
    PromptGetParams, PromptListResult, ResourceListResult, ResourceReadParams,
    ServerCapabilities, ToolCallParams, ToolListResult,
};

const CANCELLED: &str = "notifications/cancelled";

type NotificationListener = Arc<dyn Fn(&JsonRpcNotification) + Send + Sync>;

/// Zero or more listeners per notification method.
#[derive(Default)]
pub struct NotificationRouter {
    listeners: RwLock<HashMap<String, Vec<NotificationListener>>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &self,
        method: impl Into<String>,
        listener: impl Fn(&JsonRpcNotification) + Send + Sync + 'static,
    ) {
        let mut listeners = self.listeners.write().unwrap_or_else(|p| p.into_inner());
        listeners
            .entry(method.into())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Run every listener for the notification's method. Returns how many ran.
    pub fn dispatch(&self, notification: &JsonRpcNotification) -> usize {
        let matching: Vec<NotificationListener> = {
            let listeners = self.listeners.read().unwrap_or_else(|p| p.into_inner());
            listeners
                .get(&notification.method)
                .map(|l| l.to_vec())
                .unwrap_or_default()
        };
        for listener in &matching {
            listener(notification);
        }
        matching.len()
    }
}

/// What a server tells clients about itself during the handshake.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub info: Implementation,
    pub capabilities: ServerCapabilities,
    pub instructions: Option<String>,
}

/// Routes requests from a client to the built-in methods and the registry.
pub struct Dispatcher {
    registry: Arc<Registry>,
    events: Arc<EventBus>,
    notifications: NotificationRouter,
    identity: ServerIdentity,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, events: Arc<EventBus>, identity: ServerIdentity) -> Self {
        Self {
            registry,
            events,
            notifications: NotificationRouter::new(),
            identity,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn notifications(&self) -> &NotificationRouter {
        &self.notifications
    }

    /// Answer one request. Every request gets exactly one reply.
    pub async fn handle_request(
        &self,
        session: &Session,
        request: JsonRpcRequest,
    ) -> JsonRpcMessage {
        let id = request.id.clone();
        let method = request.method.clone();
        tracing::debug!("Session {}: request {id} {method}", session.id());

        match self.route(session, request).await {
            Ok(result) => JsonRpcResponse::new(id, result).into(),
            Err(e) => {
                tracing::debug!("Session {}: request {id} {method} failed: {e}", session.id());
                e.to_json_rpc_error(id).into()
            }
        }
    }

    async fn route(&self, session: &Session, request: JsonRpcRequest) -> McpResult<Value> {
        session.check_dispatch(&request.method).await?;

        let JsonRpcRequest { method, params, .. } = request;
        match method.as_str() {
            methods::INITIALIZE => self.initialize(session, params).await,
            methods::PING => Ok(codec::empty_result()),
            methods::TOOLS_LIST => {
                parse_params::<ListParams>(&method, params)?;
                to_result(&ToolListResult {
                    tools: self.registry.tools.list_tools().await,
                    next_cursor: None,
                })
            }
            methods::TOOLS_CALL => self.call_tool(session, params).await,
            methods::RESOURCES_LIST => {
                parse_params::<ListParams>(&method, params)?;
                to_result(&ResourceListResult {
                    resources: self.registry.resources.list_resources().await,
                    next_cursor: None,
                })
            }
            methods::RESOURCES_READ => self.read_resource(session, params).await,
            methods::PROMPTS_LIST => {
                parse_params::<ListParams>(&method, params)?;
                to_result(&PromptListResult {
                    prompts: self.registry.prompts.list_prompts().await,
                    next_cursor: None,
                })
            }
            methods::PROMPTS_GET => self.get_prompt(session, params).await,
            _ => Err(McpError::MethodNotFound(method)),
        }
    }

    async fn initialize(&self, session: &Session, params: Option<Value>) -> McpResult<Value> {
        let params: InitializeParams = parse_params(methods::INITIALIZE, params)?;
        let result = session
            .begin_handshake(
                params,
                self.identity.info.clone(),
                self.identity.capabilities.clone(),
                self.identity.instructions.clone(),
            )
            .await?;
        to_result(&result)
    }

    async fn call_tool(&self, session: &Session, params: Option<Value>) -> McpResult<Value> {
        let params: ToolCallParams = parse_params(methods::TOOLS_CALL, params)?;
        let tool = self
            .registry
            .tools
            .get(&params.name)
            .await
            .ok_or_else(|| McpError::InvalidTool(params.name.clone()))?;
        let arguments = params.arguments.unwrap_or_default();

        self.events.emit(ServerEvent::ToolCalled {
            session: session.id().to_string(),
            name: params.name,
            arguments: arguments.clone(),
        });
        to_result(&tool.invoke(arguments).await?)
    }

    async fn read_resource(&self, session: &Session, params: Option<Value>) -> McpResult<Value> {
        let params: ResourceReadParams = parse_params(methods::RESOURCES_READ, params)?;
        crate::resources::validate_uri(&params.uri)?;
        let resource = self
            .registry
            .resources
            .get(&params.uri)
            .await
            .ok_or_else(|| McpError::ResourceNotFound(params.uri.clone()))?;

        self.events.emit(ServerEvent::ResourceRead {
            session: session.id().to_string(),
            uri: params.uri,
        });
        to_result(&resource.read().await)
    }

    async fn get_prompt(&self, session: &Session, params: Option<Value>) -> McpResult<Value> {
        let params: PromptGetParams = parse_params(methods::PROMPTS_GET, params)?;
        let prompt = self
            .registry
            .prompts
            .get(&params.name)
            .await
            .ok_or_else(|| McpError::InvalidPrompt(params.name.clone()))?;
        let arguments = params.arguments.unwrap_or_default();

        self.events.emit(ServerEvent::PromptRequested {
            session: session.id().to_string(),
            name: params.name,
            arguments: arguments
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Map<String, Value>>(),
        });
        to_result(&prompt.get(arguments).await?)
    }

    /// Built-in handling for client notifications, then registered listeners.
    pub async fn handle_notification(&self, session: &Session, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            notifications::INITIALIZED => {
                session.mark_client_ready();
                tracing::info!("Session {}: client reports initialized", session.id());
            }
            CANCELLED => {
                tracing::debug!("Session {}: client cancelled a request", session.id());
            }
            _ => {}
        }

        let delivered = self.notifications.dispatch(&notification);
        tracing::debug!(
            "Session {}: notification {} delivered to {delivered} listener(s)",
            session.id(),
            notification.method
        );
    }

    /// Correlate a response with a request this server sent to the client.
    pub async fn handle_response(&self, session: &Session, message: JsonRpcMessage) {
        session.pending().resolve(message).await;
    }
}

fn to_result<T: Serialize>(value: &T) -> McpResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| McpError::InternalError(format!("Failed to serialize result: {e}")))
}
