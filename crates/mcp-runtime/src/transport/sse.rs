//! HTTP event-stream transport, server side.
//!
//! `GET /sse` opens a session and streams server messages as `message`
//! events, after an initial `endpoint` event naming where to POST client
//! messages. `POST /message?sessionId=<id>` delivers one client message.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json as AxumJson, Response,
    },
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use super::Transport;
use crate::protocol::codec;
use crate::server::McpServer;
use crate::types::{DecodeError, JsonRpcMessage, McpResult, TransportError};

const CHANNEL_CAPACITY: usize = 64;

type Inbound = Result<JsonRpcMessage, DecodeError>;
type ChannelTable = Arc<RwLock<HashMap<String, mpsc::Sender<Inbound>>>>;

/// Options for [`SseServer`].
#[derive(Debug, Clone, Default)]
pub struct SseServerConfig {
    /// Require `Authorization: Bearer <token>` on everything except `/health`.
    pub token: Option<String>,
    /// Allow cross-origin browser clients.
    pub cors: bool,
}

struct SseState {
    server: Arc<McpServer>,
    token: Option<String>,
    channels: ChannelTable,
}

/// Serves an [`McpServer`] over HTTP, one session per event stream.
pub struct SseServer {
    state: Arc<SseState>,
    cors: bool,
}

impl SseServer {
    pub fn new(server: Arc<McpServer>, config: SseServerConfig) -> Self {
        Self {
            state: Arc::new(SseState {
                server,
                token: config.token,
                channels: Arc::new(RwLock::new(HashMap::new())),
            }),
            cors: config.cors,
        }
    }

    pub fn router(&self) -> Router {
        let state = Arc::clone(&self.state);
        let app = Router::new()
            .route("/sse", get(handle_sse))
            .route("/message", post(handle_message))
            .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
            .route("/health", get(handle_health))
            .with_state(state);

        if self.cors {
            app.layer(CorsLayer::permissive())
        } else {
            app
        }
    }

    /// Bind and serve until the listener fails.
    pub async fn run(&self, addr: &str) -> McpResult<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(TransportError::from)?;
        tracing::info!("HTTP event-stream transport listening on {addr}");

        axum::serve(listener, self.router())
            .await
            .map_err(TransportError::from)?;
        Ok(())
    }
}

/// Removes a session's inbound channel when its event stream goes away.
struct ChannelGuard {
    id: String,
    channels: ChannelTable,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        let mut channels = self.channels.write().unwrap_or_else(|p| p.into_inner());
        if channels.remove(&self.id).is_some() {
            tracing::debug!("Event stream for session {} ended", self.id);
        }
    }
}

/// One event-stream session seen as a [`Transport`].
struct SseSessionTransport {
    inbound: Mutex<mpsc::Receiver<Inbound>>,
    outbound: std::sync::Mutex<Option<mpsc::Sender<JsonRpcMessage>>>,
    connected: AtomicBool,
}

impl SseSessionTransport {
    fn new(inbound: mpsc::Receiver<Inbound>, outbound: mpsc::Sender<JsonRpcMessage>) -> Self {
        Self {
            inbound: Mutex::new(inbound),
            outbound: std::sync::Mutex::new(Some(outbound)),
            connected: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Transport for SseSessionTransport {
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let sender = self
            .outbound
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(TransportError::Closed)?;
        sender.send(message.clone()).await.map_err(|_| {
            self.connected.store(false, Ordering::SeqCst);
            TransportError::Disconnected
        })
    }

    async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        match self.inbound.lock().await.recv().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(TransportError::Decode(e)),
            None => {
                self.connected.store(false, Ordering::SeqCst);
                Err(TransportError::Disconnected)
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.outbound
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Auth middleware: checks the bearer token if one is configured.
/// `/health` is routed outside this layer.
async fn auth_layer(
    State(state): State<Arc<SseState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Response {
    if let Some(expected) = &state.token {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                AxumJson(serde_json::json!({ "error": "Unauthorized" })),
            )
                .into_response();
        }
    }

    next.run(request).await
}

async fn handle_sse(
    State(state): State<Arc<SseState>>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let id = Uuid::new_v4().to_string();
    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);

    state
        .channels
        .write()
        .unwrap_or_else(|p| p.into_inner())
        .insert(id.clone(), inbound_tx);
    let guard = ChannelGuard {
        id: id.clone(),
        channels: Arc::clone(&state.channels),
    };

    let transport = Arc::new(SseSessionTransport::new(inbound_rx, outbound_tx));
    let server = Arc::clone(&state.server);
    let session_id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = server.serve_session(session_id, transport).await {
            tracing::debug!("Event-stream session ended with error: {e}");
        }
    });

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(Event::default().event("endpoint").data(format!("/message?sessionId={id}")));
        while let Some(message) = outbound_rx.recv().await {
            match codec::encode(&message) {
                Ok(json) => yield Ok(Event::default().event("message").data(json)),
                Err(e) => tracing::warn!("Failed to encode outbound message: {e}"),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn handle_message(
    State(state): State<Arc<SseState>>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Some(session_id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "Missing sessionId query parameter").into_response();
    };

    let sender = state
        .channels
        .read()
        .unwrap_or_else(|p| p.into_inner())
        .get(&session_id)
        .cloned();
    let Some(sender) = sender else {
        return (StatusCode::NOT_FOUND, "Unknown session").into_response();
    };

    if sender.send(codec::decode(&body)).await.is_err() {
        return (StatusCode::NOT_FOUND, "Session closed").into_response();
    }
    StatusCode::ACCEPTED.into_response()
}

/// Health check endpoint. No auth required.
async fn handle_health(State(state): State<Arc<SseState>>) -> AxumJson<serde_json::Value> {
    AxumJson(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.server.sessions().len().await,
    }))
}
