//! Client/server integration tests for mcp-runtime.
//!
//! Runs `McpClient` against `McpServer` over an in-memory duplex pipe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use mcp_runtime::protocol::SessionPhase;
use mcp_runtime::transport::StreamTransport;
use mcp_runtime::types::*;
use mcp_runtime::{McpClient, McpServer, RuntimeConfig, Tool};

// ─────────────────────── helpers ───────────────────────

fn connect(
    server: Arc<McpServer>,
    config: &RuntimeConfig,
) -> (McpClient, JoinHandle<McpResult<()>>) {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);

    let (server_read, server_write) = tokio::io::split(server_side);
    let server_transport = Arc::new(StreamTransport::new(server_read, server_write));
    let task = tokio::spawn(async move { server.serve(server_transport).await });

    let (client_read, client_write) = tokio::io::split(client_side);
    let client = McpClient::connect(
        Arc::new(StreamTransport::new(client_read, client_write)),
        config,
    );
    (client, task)
}

async fn builtin_server(config: RuntimeConfig) -> Arc<McpServer> {
    Arc::new(McpServer::with_builtins(config).await.unwrap())
}

async fn ready_client() -> (McpClient, Arc<McpServer>) {
    let server = builtin_server(RuntimeConfig::default()).await;
    let (client, _task) = connect(Arc::clone(&server), &RuntimeConfig::default());
    client.initialize().await.unwrap();
    (client, server)
}

async fn slow(_args: Map<String, Value>) -> anyhow::Result<ToolCallResult> {
    tokio::time::sleep(Duration::from_secs(60)).await;
    Ok(ToolCallResult::text("finally"))
}

fn slow_tool() -> Tool {
    Tool::new("slow", "Takes a minute", InputSchema::object(), slow).unwrap()
}

// ─────────────────────── handshake ───────────────────────

#[tokio::test]
async fn initialize_negotiates_preferred_version() {
    let server = builtin_server(RuntimeConfig::default()).await;
    let (client, _task) = connect(server, &RuntimeConfig::default());
    assert_eq!(client.phase().await, SessionPhase::Uninitialized);

    let negotiated = client.initialize().await.unwrap();
    assert_eq!(negotiated.protocol_version, "2024-11-05");
    assert_eq!(negotiated.server_info.name, "mcp-runtime");
    assert_eq!(client.phase().await, SessionPhase::Initialized);
    assert!(client.server_capabilities().await.unwrap().tools_list_changed());
}

#[tokio::test]
async fn requests_before_initialize_fail_locally() {
    let server = builtin_server(RuntimeConfig::default()).await;
    let (client, _task) = connect(server, &RuntimeConfig::default());

    let err = client.list_tools().await.unwrap_err();
    assert_eq!(err.code(), -32600);

    let err = client.request("initialize", None).await.unwrap_err();
    assert_eq!(err.code(), -32600);
}

#[tokio::test]
async fn rejected_handshake_leaves_client_retryable() {
    let server = builtin_server(RuntimeConfig::default()).await;
    let old = RuntimeConfig::default().with_supported_versions(vec!["1999-01-01".to_string()]);
    let (client, _task) = connect(server, &old);

    let err = client.initialize().await.unwrap_err();
    assert_eq!(err.code(), -32602);
    assert_eq!(client.phase().await, SessionPhase::Uninitialized);
}

// ─────────────────────── calls ───────────────────────

#[tokio::test]
async fn echo_hi() {
    let (client, _server) = ready_client().await;
    let result = client.call_tool("echo", json!({ "text": "hi" })).await.unwrap();
    assert_eq!(result, ToolCallResult::text("hi"));
}

#[tokio::test]
async fn listings_and_reads() {
    let (client, _server) = ready_client().await;

    let tools: Vec<String> = client
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(tools, vec!["echo", "add", "uuid"]);

    let resources = client.list_resources().await.unwrap();
    assert_eq!(resources.len(), 2);

    let sessions = client.read_resource("runtime://sessions").await.unwrap();
    let body: Value = serde_json::from_str(sessions.contents[0].text.as_deref().unwrap()).unwrap();
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["sessions"][0]["phase"], json!("initialized"));

    let prompts = client.list_prompts().await.unwrap();
    assert_eq!(prompts[0].name, "summarize");

    let mut args = HashMap::new();
    args.insert("text".to_string(), "A long story.".to_string());
    let expanded = client.get_prompt("summarize", args).await.unwrap();
    assert!(!expanded.messages.is_empty());

    client.ping().await.unwrap();
}

#[tokio::test]
async fn remote_errors_keep_their_codes() {
    let (client, _server) = ready_client().await;

    let err = client.call_tool("nope", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Remote(_)));
    assert_eq!(err.code(), -32000);

    let err = client.read_resource("runtime://missing").await.unwrap_err();
    assert_eq!(err.code(), -32003);

    let err = client.request("bogus", None).await.unwrap_err();
    assert_eq!(err.code(), -32601);
}

#[tokio::test]
async fn flagged_tool_result_converts_to_execution_error() {
    let (client, _server) = ready_client().await;
    let result = client
        .call_tool("add", json!({ "a": 1e308, "b": 1e308 }))
        .await
        .unwrap();
    assert!(result.is_error());
    assert_eq!(result.into_content().unwrap_err().code(), -32004);
}

#[tokio::test]
async fn concurrent_calls_resolve_independently() {
    let (client, _server) = ready_client().await;
    let client = Arc::new(client);

    let calls = (0..20).map(|i| {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            let text = format!("msg-{i}");
            let result = client.call_tool("echo", json!({ "text": text })).await.unwrap();
            assert_eq!(result, ToolCallResult::text(text));
        })
    });
    for call in calls {
        call.await.unwrap();
    }
}

// ─────────────────────── timeouts & disconnects ───────────────────────

#[tokio::test(start_paused = true)]
async fn timeout_abandons_request_and_drops_late_response() {
    let server = builtin_server(RuntimeConfig::default()).await;
    server.register_tool(slow_tool()).await.unwrap();
    let config = RuntimeConfig::default().with_request_timeout(Duration::from_secs(1));
    let (client, _task) = connect(server, &config);
    client.initialize().await.unwrap();

    let err = client.call_tool("slow", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Timeout { .. }));

    // Let the tool finish; its reply has nobody waiting and is dropped.
    tokio::time::sleep(Duration::from_secs(61)).await;
    client.ping().await.unwrap();
    let result = client.call_tool("echo", json!({ "text": "still here" })).await.unwrap();
    assert_eq!(result, ToolCallResult::text("still here"));
}

#[tokio::test]
async fn disconnect_fails_in_flight_requests() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let client = McpClient::connect(
        Arc::new(StreamTransport::new(client_read, client_write)),
        &RuntimeConfig::default(),
    );

    // A peer that reads the handshake request and hangs up without answering.
    let peer = tokio::spawn(async move {
        let (server_read, _server_write) = tokio::io::split(server_side);
        let mut lines = BufReader::new(server_read).lines();
        lines.next_line().await.unwrap();
    });

    let err = client.initialize().await.unwrap_err();
    assert!(matches!(err, McpError::Disconnected));
    peer.await.unwrap();

    // Wait for the read loop to observe EOF and close the negotiator.
    for _ in 0..100 {
        if client.phase().await == SessionPhase::Closed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.phase().await, SessionPhase::Closed);
    assert!(matches!(client.ping().await.unwrap_err(), McpError::SessionClosed));
}

#[tokio::test]
async fn server_traffic_before_handshake_is_refused() {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let client = McpClient::connect(
        Arc::new(StreamTransport::new(client_read, client_write)),
        &RuntimeConfig::default(),
    );
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    client.on_notification("custom/early", move |n| {
        let _ = tx.send(n.method.clone());
    });

    let (server_read, mut server_write) = tokio::io::split(server_side);
    let mut lines = BufReader::new(server_read).lines();
    server_write
        .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"custom/early\"}\n")
        .await
        .unwrap();
    server_write
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"ping\"}\n")
        .await
        .unwrap();

    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let reply: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply["id"], json!(7));
    assert_eq!(reply["error"]["code"], json!(-32600));
    assert!(rx.try_recv().is_err());
    assert_eq!(client.phase().await, SessionPhase::Uninitialized);
}

#[tokio::test]
async fn client_close_ends_the_server_session() {
    let server = builtin_server(RuntimeConfig::default()).await;
    let (client, task) = connect(Arc::clone(&server), &RuntimeConfig::default());
    client.initialize().await.unwrap();
    client.ping().await.unwrap();

    client.close().await.unwrap();
    client.close().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(server.sessions().is_empty().await);
}

// ─────────────────────── notifications ───────────────────────

#[tokio::test]
async fn list_changed_reaches_client_listeners() {
    let (client, server) = ready_client().await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    client.on_notification("notifications/tools/list_changed", move |n| {
        let _ = tx.send(n.method.clone());
    });
    // Round-trip so the server has seen notifications/initialized.
    client.ping().await.unwrap();

    server.register_tool(slow_tool()).await.unwrap();
    let method = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(method, "notifications/tools/list_changed");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.last().unwrap().name, "slow");
}

#[tokio::test]
async fn server_ping_is_answered_by_client() {
    let (client, server) = ready_client().await;
    client.ping().await.unwrap();

    let id = server.sessions().list().await[0].id().to_string();
    server.ping_client(&id).await.unwrap();
}

#[tokio::test]
async fn server_notification_listener_sees_client_notifications() {
    let server = builtin_server(RuntimeConfig::default()).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    server.on_notification("custom/hello", move |n| {
        let _ = tx.send(n.params.clone());
    });

    let (client, _task) = connect(Arc::clone(&server), &RuntimeConfig::default());
    client.initialize().await.unwrap();
    client
        .notify("custom/hello", Some(json!({ "who": "client" })))
        .await
        .unwrap();

    let params = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(params, Some(json!({ "who": "client" })));
}

// ─────────────────────── HTTP event stream ───────────────────────

#[cfg(feature = "sse")]
#[tokio::test]
async fn handshake_and_call_over_http() {
    use mcp_runtime::transport::{SseClientTransport, SseServer, SseServerConfig};

    let server = builtin_server(RuntimeConfig::default()).await;
    let http = SseServer::new(
        server,
        SseServerConfig {
            token: Some("secret".to_string()),
            cors: false,
        },
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = http.router();
    tokio::spawn(async move { axum::serve(listener, router).await });

    let base = format!("http://{addr}");
    assert!(SseClientTransport::connect(&base).await.is_err());

    let transport = SseClientTransport::connect_with_auth(&base, Some("secret".to_string()))
        .await
        .unwrap();
    let client = McpClient::connect(Arc::new(transport), &RuntimeConfig::default());
    client.initialize().await.unwrap();

    let result = client.call_tool("echo", json!({ "text": "over http" })).await.unwrap();
    assert_eq!(result, ToolCallResult::text("over http"));
    client.close().await.unwrap();
}
