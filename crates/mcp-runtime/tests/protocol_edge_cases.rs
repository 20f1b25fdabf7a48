//! Wire-level integration tests for mcp-runtime.
//!
//! Drives a real `McpServer` with raw newline-delimited frames over an
//! in-memory duplex pipe, covering the handshake gate, error codes, the
//! bad-frame policy and concurrency.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};
use tokio::task::JoinHandle;

use mcp_runtime::events::{EventKind, ServerEvent};
use mcp_runtime::transport::StreamTransport;
use mcp_runtime::types::*;
use mcp_runtime::{McpResult, McpServer, RuntimeConfig, Tool};

// ─────────────────────── helpers ───────────────────────

struct RawPeer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    task: JoinHandle<McpResult<()>>,
}

impl RawPeer {
    async fn start(server: Arc<McpServer>) -> Self {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_side);
        let transport = Arc::new(StreamTransport::new(server_read, server_write));
        let task = tokio::spawn(async move { server.serve(transport).await });

        let (client_read, client_write) = tokio::io::split(client_side);
        Self {
            lines: BufReader::new(client_read).lines(),
            writer: client_write,
            task,
        }
    }

    async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send(&mut self, message: Value) {
        self.send_line(&message.to_string()).await;
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("server closed the stream");
        serde_json::from_str(&line).unwrap()
    }

    async fn request(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.send(mcp_request(id, method, params)).await;
        self.recv().await
    }

    async fn initialize(&mut self) -> Value {
        let reply = self.request(0, "initialize", init_params("2024-11-05")).await;
        self.send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .await;
        reply
    }

    /// Close our write side and wait for the server to finish.
    async fn hang_up(mut self) -> McpResult<()> {
        self.writer.shutdown().await.unwrap();
        drop(self.writer);
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .unwrap()
    }
}

fn mcp_request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

fn init_params(version: &str) -> Value {
    json!({
        "protocolVersion": version,
        "capabilities": {},
        "clientInfo": { "name": "test-client", "version": "1.0" }
    })
}

async fn builtin_server() -> Arc<McpServer> {
    Arc::new(McpServer::with_builtins(RuntimeConfig::default()).await.unwrap())
}

fn error_code(reply: &Value) -> i64 {
    reply["error"]["code"].as_i64().expect("expected an error reply")
}

// ─────────────────────── handshake ───────────────────────

#[tokio::test]
async fn handshake_returns_version_capabilities_and_identity() {
    let mut peer = RawPeer::start(builtin_server().await).await;
    let reply = peer.initialize().await;

    assert_eq!(reply["id"], json!(0));
    assert_eq!(reply["result"]["protocolVersion"], json!("2024-11-05"));
    assert_eq!(reply["result"]["serverInfo"]["name"], json!("mcp-runtime"));
    assert_eq!(reply["result"]["capabilities"]["tools"]["listChanged"], json!(true));
    assert!(reply["result"]["instructions"].is_string());

    peer.hang_up().await.unwrap();
}

#[tokio::test]
async fn requests_before_initialize_are_invalid() {
    let mut peer = RawPeer::start(builtin_server().await).await;

    let reply = peer.request(1, "tools/list", json!({})).await;
    assert_eq!(error_code(&reply), -32600);
    assert_eq!(reply["id"], json!(1));

    let reply = peer.request(2, "ping", json!({})).await;
    assert_eq!(error_code(&reply), -32600);

    // The session is still usable afterwards.
    peer.initialize().await;
    let reply = peer.request(3, "ping", json!({})).await;
    assert_eq!(reply["result"], json!({}));
}

#[tokio::test]
async fn notifications_before_initialize_are_dropped() {
    let server = builtin_server().await;
    let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    server.on_notification("custom/event", move |_| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });
    let mut events = server.events().subscribe();
    let mut peer = RawPeer::start(Arc::clone(&server)).await;

    peer.send(json!({ "jsonrpc": "2.0", "method": "custom/event" }))
        .await;
    peer.send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await;
    // Frames are read in order, so this reply means both were seen.
    let reply = peer.request(1, "ping", json!({})).await;
    assert_eq!(error_code(&reply), -32600);

    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(!server.sessions().list().await[0].client_ready());
    match events.recv().await.unwrap() {
        ServerEvent::Error { code, .. } => assert_eq!(code, -32600),
        other => panic!("unexpected event: {other:?}"),
    }

    peer.initialize().await;
    peer.send(json!({ "jsonrpc": "2.0", "method": "custom/event" }))
        .await;
    peer.request(2, "ping", json!({})).await;
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(server.sessions().list().await[0].client_ready());
}

#[tokio::test]
async fn unsupported_version_can_be_retried() {
    let mut peer = RawPeer::start(builtin_server().await).await;

    let reply = peer.request(1, "initialize", init_params("1999-01-01")).await;
    assert_eq!(error_code(&reply), -32602);

    let reply = peer.request(2, "initialize", init_params("2025-03-26")).await;
    assert_eq!(reply["result"]["protocolVersion"], json!("2025-03-26"));
}

#[tokio::test]
async fn second_initialize_is_rejected() {
    let mut peer = RawPeer::start(builtin_server().await).await;
    peer.initialize().await;

    let reply = peer.request(9, "initialize", init_params("2024-11-05")).await;
    assert_eq!(error_code(&reply), -32600);
}

#[tokio::test]
async fn request_right_after_initialize_is_not_rejected() {
    let mut peer = RawPeer::start(builtin_server().await).await;

    // No waiting between the handshake and the next request.
    peer.send(mcp_request(0, "initialize", init_params("2024-11-05")))
        .await;
    peer.send(mcp_request(1, "tools/list", json!({}))).await;

    let first = peer.recv().await;
    let second = peer.recv().await;
    assert_eq!(first["id"], json!(0));
    assert_eq!(second["id"], json!(1));
    assert_eq!(second["result"]["tools"].as_array().unwrap().len(), 3);
}

// ─────────────────────── dispatch ───────────────────────

#[tokio::test]
async fn echo_round_trip() {
    let mut peer = RawPeer::start(builtin_server().await).await;
    peer.initialize().await;

    let reply = peer
        .request(1, "tools/call", json!({ "name": "echo", "arguments": { "text": "hi" } }))
        .await;
    assert_eq!(
        reply["result"],
        json!({ "content": [{ "type": "text", "text": "hi" }] })
    );
}

#[tokio::test]
async fn tools_are_listed_in_registration_order() {
    let mut peer = RawPeer::start(builtin_server().await).await;
    peer.initialize().await;

    let reply = peer.request(1, "tools/list", json!({})).await;
    let names: Vec<&str> = reply["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["echo", "add", "uuid"]);
    assert!(reply["result"]["tools"][0]["inputSchema"]["properties"]["text"].is_object());
}

#[tokio::test]
async fn error_codes_follow_the_table() {
    let mut peer = RawPeer::start(builtin_server().await).await;
    peer.initialize().await;

    let reply = peer.request(1, "tools/call", json!({ "name": "nope" })).await;
    assert_eq!(error_code(&reply), -32000);

    let reply = peer.request(2, "resources/read", json!({ "uri": "no scheme" })).await;
    assert_eq!(error_code(&reply), -32001);

    let reply = peer.request(3, "prompts/get", json!({ "name": "nope" })).await;
    assert_eq!(error_code(&reply), -32002);

    let reply = peer
        .request(4, "resources/read", json!({ "uri": "runtime://missing" }))
        .await;
    assert_eq!(error_code(&reply), -32003);

    let reply = peer.request(5, "no/such/method", json!({})).await;
    assert_eq!(error_code(&reply), -32601);

    let reply = peer.request(6, "tools/call", json!({ "arguments": {} })).await;
    assert_eq!(error_code(&reply), -32602);

    let reply = peer
        .request(7, "prompts/get", json!({ "name": "summarize", "arguments": {} }))
        .await;
    assert_eq!(error_code(&reply), -32602);
}

#[tokio::test]
async fn failing_tool_is_reported_in_band() {
    let server = builtin_server().await;
    server
        .register_tool(
            Tool::new(
                "explode",
                "Always fails",
                InputSchema::object(),
                |_args: serde_json::Map<String, Value>| async move {
                    Err::<ToolCallResult, _>(anyhow::anyhow!("boom"))
                },
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let mut peer = RawPeer::start(server).await;
    peer.initialize().await;

    let reply = peer.request(1, "tools/call", json!({ "name": "explode" })).await;
    assert!(reply.get("error").is_none());
    assert_eq!(reply["result"]["isError"], json!(true));
    assert!(reply["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("boom"));

    // The session survives.
    let reply = peer.request(2, "ping", json!({})).await;
    assert_eq!(reply["result"], json!({}));
}

#[tokio::test]
async fn runtime_info_resource_reads() {
    let mut peer = RawPeer::start(builtin_server().await).await;
    peer.initialize().await;

    let reply = peer
        .request(1, "resources/read", json!({ "uri": "runtime://info" }))
        .await;
    let content = &reply["result"]["contents"][0];
    assert_eq!(content["uri"], json!("runtime://info"));
    let info: Value = serde_json::from_str(content["text"].as_str().unwrap()).unwrap();
    assert_eq!(info["name"], json!("mcp-runtime"));
}

#[tokio::test]
async fn concurrent_requests_each_get_their_own_reply() {
    let mut peer = RawPeer::start(builtin_server().await).await;
    peer.initialize().await;

    const N: i64 = 25;
    for id in 1..=N {
        peer.send(mcp_request(
            id,
            "tools/call",
            json!({ "name": "add", "arguments": { "a": id, "b": 1 } }),
        ))
        .await;
    }

    let mut seen = std::collections::HashMap::new();
    for _ in 0..N {
        let reply = peer.recv().await;
        let id = reply["id"].as_i64().unwrap();
        let text = reply["result"]["content"][0]["text"].as_str().unwrap();
        let sum: Value = serde_json::from_str(text).unwrap();
        seen.insert(id, sum["sum"].as_f64().unwrap());
    }
    assert_eq!(seen.len(), N as usize);
    for id in 1..=N {
        assert_eq!(seen[&id], (id + 1) as f64);
    }
}

// ─────────────────────── bad frames ───────────────────────

#[tokio::test]
async fn malformed_request_with_id_gets_parse_error() {
    let mut peer = RawPeer::start(builtin_server().await).await;
    peer.initialize().await;

    // Wrong jsonrpc version, but id and method are recoverable.
    peer.send(json!({ "jsonrpc": "1.0", "id": 7, "method": "ping" }))
        .await;
    let reply = peer.recv().await;
    assert_eq!(reply["id"], json!(7));
    assert_eq!(error_code(&reply), -32700);

    let reply = peer.request(8, "ping", json!({})).await;
    assert_eq!(reply["result"], json!({}));
}

#[tokio::test]
async fn garbage_line_tears_the_session_down() {
    let server = builtin_server().await;
    let mut events = server.events().subscribe();
    let mut peer = RawPeer::start(Arc::clone(&server)).await;
    peer.initialize().await;

    peer.send_line("this is not json").await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), peer.task)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_err());
    assert!(server.sessions().is_empty().await);

    let mut saw_error = false;
    let mut saw_disconnect = false;
    while let Ok(event) = events.try_recv() {
        match event {
            ServerEvent::Error { code, .. } => {
                assert_eq!(code, -32700);
                saw_error = true;
            }
            ServerEvent::Disconnected { .. } => saw_disconnect = true,
            _ => {}
        }
    }
    assert!(saw_error && saw_disconnect);
}

#[tokio::test]
async fn blank_lines_are_ignored() {
    let mut peer = RawPeer::start(builtin_server().await).await;
    peer.initialize().await;

    peer.send_line("").await;
    peer.send_line("   ").await;
    let reply = peer.request(1, "ping", json!({})).await;
    assert_eq!(reply["result"], json!({}));
}

// ─────────────────────── notifications & events ───────────────────────

#[tokio::test]
async fn registration_broadcasts_list_changed() {
    let server = builtin_server().await;
    let mut peer = RawPeer::start(Arc::clone(&server)).await;
    peer.initialize().await;
    // Make sure the session has been marked initialized before registering.
    peer.request(1, "ping", json!({})).await;

    server.unregister_tool("uuid").await;
    let note = peer.recv().await;
    assert_eq!(note["method"], json!("notifications/tools/list_changed"));
    assert!(note.get("id").is_none());
}

#[tokio::test]
async fn log_reaches_initialized_sessions() {
    let server = builtin_server().await;
    let mut peer = RawPeer::start(Arc::clone(&server)).await;
    peer.initialize().await;
    peer.request(1, "ping", json!({})).await;

    let reached = server
        .log(LogLevel::Warning, Some("test"), json!("careful"))
        .await
        .unwrap();
    assert_eq!(reached, 1);

    let note = peer.recv().await;
    assert_eq!(note["method"], json!("notifications/message"));
    assert_eq!(note["params"]["level"], json!("warning"));
    assert_eq!(note["params"]["data"], json!("careful"));
}

#[tokio::test]
async fn events_fire_for_handshake_and_calls() {
    let server = builtin_server().await;
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    server.events().on(EventKind::ToolCalled, move |_| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });
    let mut events = server.events().subscribe();

    let mut peer = RawPeer::start(Arc::clone(&server)).await;
    peer.initialize().await;
    peer.request(1, "tools/call", json!({ "name": "echo", "arguments": { "text": "x" } }))
        .await;

    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    match events.recv().await.unwrap() {
        ServerEvent::Initialized { client, .. } => {
            assert_eq!(client.unwrap().name, "test-client")
        }
        other => panic!("unexpected first event: {other:?}"),
    }
}

#[tokio::test]
async fn ping_client_round_trips() {
    let server = builtin_server().await;
    let mut peer = RawPeer::start(Arc::clone(&server)).await;
    peer.initialize().await;
    peer.request(1, "ping", json!({})).await;

    let id = server.sessions().list().await[0].id().to_string();
    let pinger = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.ping_client(&id).await })
    };

    let ping = peer.recv().await;
    assert_eq!(ping["method"], json!("ping"));
    peer.send(json!({ "jsonrpc": "2.0", "id": ping["id"].clone(), "result": {} }))
        .await;

    pinger.await.unwrap().unwrap();
}

#[tokio::test]
async fn hang_up_removes_the_session() {
    let server = builtin_server().await;
    let mut peer = RawPeer::start(Arc::clone(&server)).await;
    peer.initialize().await;
    peer.request(1, "ping", json!({})).await;
    assert_eq!(server.sessions().len().await, 1);

    peer.hang_up().await.unwrap();
    assert!(server.sessions().is_empty().await);
}
