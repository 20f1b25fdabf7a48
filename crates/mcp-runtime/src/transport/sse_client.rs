//! HTTP event-stream transport, client side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, StatusCode, Url};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use super::Transport;
use crate::protocol::codec;
use crate::types::{DecodeError, JsonRpcMessage, TransportError};

const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);
const CHANNEL_CAPACITY: usize = 64;

type Inbound = Result<JsonRpcMessage, DecodeError>;

/// Connects to an [`SseServer`](super::SseServer): reads server messages from
/// `GET /sse` and POSTs client messages to the endpoint it announces.
pub struct SseClientTransport {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
    inbound: Mutex<mpsc::Receiver<Inbound>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
}

impl SseClientTransport {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3100`.
    pub async fn connect(base_url: &str) -> Result<Self, TransportError> {
        Self::connect_with_auth(base_url, None).await
    }

    pub async fn connect_with_auth(
        base_url: &str,
        token: Option<String>,
    ) -> Result<Self, TransportError> {
        let base = Url::parse(base_url)
            .map_err(|e| TransportError::Other(format!("Invalid URL {base_url}: {e}")))?;
        let stream_url = base
            .join("/sse")
            .map_err(|e| TransportError::Other(format!("Invalid URL {base_url}: {e}")))?;

        let http = reqwest::Client::new();
        let mut request = http
            .get(stream_url.clone())
            .header(header::ACCEPT, "text/event-stream");
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(http_error)?;
        if !response.status().is_success() {
            return Err(TransportError::Other(format!(
                "Event stream at {stream_url} rejected: HTTP {}",
                response.status()
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(pump(
            response,
            endpoint_tx,
            inbound_tx,
            Arc::clone(&connected),
        ));

        let endpoint = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
            Ok(Ok(path)) => base.join(&path).map_err(|e| {
                TransportError::Other(format!("Server announced a bad endpoint {path}: {e}"))
            }),
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => Err(TransportError::Other(format!(
                "No endpoint event within {}s",
                ENDPOINT_TIMEOUT.as_secs()
            ))),
        };
        let endpoint = match endpoint {
            Ok(endpoint) => endpoint,
            Err(e) => {
                reader.abort();
                return Err(e);
            }
        };
        tracing::debug!("Event stream open, posting to {endpoint}");

        Ok(Self {
            http,
            endpoint,
            token,
            inbound: Mutex::new(inbound_rx),
            reader: std::sync::Mutex::new(Some(reader)),
            connected,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for SseClientTransport {
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let body = serde_json::to_string(message)
            .map_err(|e| TransportError::Other(format!("Failed to encode message: {e}")))?;

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(http_error)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                self.connected.store(false, Ordering::SeqCst);
                Err(TransportError::Disconnected)
            }
            status => Err(TransportError::Other(format!("POST rejected: HTTP {status}"))),
        }
    }

    async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        match self.inbound.lock().await.recv().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(TransportError::Decode(e)),
            None => Err(TransportError::Disconnected),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SseClientTransport {
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

fn http_error(e: reqwest::Error) -> TransportError {
    if e.is_connect() {
        TransportError::Disconnected
    } else {
        TransportError::Other(format!("HTTP error: {e}"))
    }
}

/// Reads the event stream until it ends, routing the endpoint announcement
/// and message events.
async fn pump(
    response: reqwest::Response,
    endpoint: oneshot::Sender<String>,
    inbound: mpsc::Sender<Inbound>,
    connected: Arc<AtomicBool>,
) {
    let mut endpoint = Some(endpoint);
    let mut parser = EventParser::default();
    let mut body = response.bytes_stream();

    'stream: while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("Event stream failed: {e}");
                break;
            }
        };
        for event in parser.feed(&chunk) {
            match event.event.as_str() {
                "endpoint" => {
                    if let Some(tx) = endpoint.take() {
                        let _ = tx.send(event.data);
                    }
                }
                "message" => {
                    if inbound.send(codec::decode(&event.data)).await.is_err() {
                        break 'stream;
                    }
                }
                other => tracing::debug!("Ignoring event type {other}"),
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    tracing::debug!("Event stream closed");
}

#[derive(Debug, Clone, PartialEq)]
struct StreamEvent {
    event: String,
    data: String,
}

/// Incremental `text/event-stream` parser. Chunks may split events anywhere.
#[derive(Default)]
struct EventParser {
    buffer: Vec<u8>,
}

impl EventParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend(chunk.iter().filter(|&&b| b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<StreamEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        // Comment lines carry keep-alives.
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(StreamEvent {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}
