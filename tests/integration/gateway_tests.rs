//! End-to-end gateway tests: a real WebSocket client against a real
//! bridge forwarding to the `mock-ls` test server binary.
//!
//! Each test binds an ephemeral port, runs the gateway on it, and
//! speaks JSON-RPC over `tokio-tungstenite` exactly as an editor
//! client would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use rpc_bridge::gateway;
use rpc_bridge::rpc::Envelope;
use rpc_bridge::GlobalConfig;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a gateway on an ephemeral port, forwarding to `mock-ls`
/// with the given extra arguments.
async fn start_gateway(server_args: Vec<String>) -> (SocketAddr, CancellationToken) {
    start_gateway_for(env!("CARGO_BIN_EXE_mock-ls").to_owned(), server_args).await
}

async fn start_gateway_for(
    server_command: String,
    server_args: Vec<String>,
) -> (SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let config = Arc::new(GlobalConfig {
        listen_addr: addr.to_string(),
        server_command,
        server_args,
        ..GlobalConfig::default()
    });

    let ct = CancellationToken::new();
    let serve_ct = ct.clone();
    tokio::spawn(async move {
        if let Err(err) = gateway::serve_with_listener(listener, config, serve_ct).await {
            eprintln!("gateway exited with error: {err}");
        }
    });

    (addr, ct)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/"))
        .await
        .expect("websocket connect");
    ws
}

async fn send(ws: &mut Client, envelope: &Envelope) {
    let frame = envelope.to_json().expect("serialize envelope");
    ws.send(Message::Text(frame)).await.expect("send frame");
}

/// Read frames until the reply correlated to `id` shows up.
async fn recv_reply(ws: &mut Client, id: &serde_json::Value) -> Envelope {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("reply within 10s")
            .expect("connection open")
            .expect("websocket frame");
        let Message::Text(text) = message else {
            continue;
        };
        let envelope = Envelope::from_json(&text).expect("valid envelope");
        if envelope.id.as_ref() == Some(id) {
            return envelope;
        }
    }
}

// ── Full editor-style exchange ──────────────────────────────────────

#[tokio::test]
async fn initialize_and_hover_round_trip_end_to_end() {
    let (addr, ct) = start_gateway(Vec::new()).await;
    let mut ws = connect(addr).await;

    send(
        &mut ws,
        &Envelope::request(json!(1), "initialize", Some(json!({"rootUri": "file:///tmp"}))),
    )
    .await;
    let reply = recv_reply(&mut ws, &json!(1)).await;
    let result = reply.result.expect("initialize result");
    assert_eq!(result.pointer("/capabilities/hoverProvider"), Some(&json!(true)));
    assert_eq!(result.pointer("/rootUri"), Some(&json!("file:///tmp")));

    // A notification in between must not produce any reply of its own.
    send(
        &mut ws,
        &Envelope::notification(
            "textDocument/didOpen",
            Some(json!({"textDocument": {"uri": "file:///tmp/a.rs"}})),
        ),
    )
    .await;

    send(
        &mut ws,
        &Envelope::request(
            json!("hover-1"),
            "textDocument/hover",
            Some(json!({"textDocument": {"uri": "file:///tmp/a.rs"}})),
        ),
    )
    .await;
    let reply = recv_reply(&mut ws, &json!("hover-1")).await;
    let contents = reply
        .result
        .as_ref()
        .and_then(|r| r.pointer("/contents"))
        .and_then(serde_json::Value::as_str)
        .expect("hover contents");
    assert!(
        contents.contains("mock hover for file:///tmp/a.rs"),
        "unexpected hover: {contents}"
    );

    ct.cancel();
}

// ── Error passthrough over the wire ─────────────────────────────────

#[tokio::test]
async fn unknown_method_error_reaches_the_client_verbatim() {
    let (addr, ct) = start_gateway(Vec::new()).await;
    let mut ws = connect(addr).await;

    send(&mut ws, &Envelope::request(json!(5), "workspace/flobber", None)).await;
    let reply = recv_reply(&mut ws, &json!(5)).await;

    let error = reply.error.expect("error payload");
    assert_eq!(error.code, Some(-32601));
    assert_eq!(error.message, "method not found");
    assert!(reply.result.is_none());

    ct.cancel();
}

// ── Health endpoint ─────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint_answers_without_a_session() {
    let (addr, ct) = start_gateway(Vec::new()).await;

    let mut stream = TcpStream::connect(addr).await.expect("tcp connect");
    stream
        .write_all(
            format!("GET /health HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n").as_bytes(),
        )
        .await
        .expect("write request");

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.ends_with("ok"), "got: {response}");

    ct.cancel();
}

// ── Spawn failure refuses the upgrade ───────────────────────────────

#[tokio::test]
async fn spawn_failure_rejects_the_connection() {
    let (addr, ct) =
        start_gateway_for("definitely-not-a-real-binary-4288".to_owned(), Vec::new()).await;

    let result = connect_async(format!("ws://{addr}/")).await;
    assert!(result.is_err(), "upgrade must be refused when spawn fails");

    ct.cancel();
}

// ── Server crash closes the connection ──────────────────────────────

#[tokio::test]
async fn server_exit_closes_the_client_connection() {
    let (addr, ct) = start_gateway(vec!["--exit-after-initialize".to_owned()]).await;
    let mut ws = connect(addr).await;

    send(&mut ws, &Envelope::request(json!(1), "initialize", Some(json!({})))).await;
    let reply = recv_reply(&mut ws, &json!(1)).await;
    assert!(reply.result.is_some(), "initialize still answered");

    // The server exits right after; the bridge must close our
    // connection rather than leave it dangling.
    loop {
        match tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("connection closes after server exit")
        {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        }
    }

    ct.cancel();
}
