#![forbid(unsafe_code)]

//! `rpc-bridge-probe` — WebSocket probe client for a bridged language
//! server.
//!
//! Connects to a running bridge, drives the standard language-server
//! handshake (`initialize`, `initialized`, `textDocument/didOpen`,
//! `textDocument/hover`), asserts expected substrings in the hover
//! result, and prints per-step timings. A plain consumer of the
//! JSON-RPC peer connection — it knows nothing about the bridge's
//! internals.

use std::time::{Duration, Instant};

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use rpc_bridge::rpc::Envelope;
use rpc_bridge::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "rpc-bridge-probe",
    about = "Probe a bridged language server over WebSocket",
    version,
    long_about = None
)]
struct Cli {
    /// WebSocket URL of the bridge (ws:// or wss://).
    #[arg(long, default_value = "ws://127.0.0.1:4288")]
    url: String,

    /// Document URI opened and hovered during the probe.
    #[arg(long, default_value = "file:///probe/sample.py")]
    uri: String,

    /// Substring expected in the hover result (repeatable).
    #[arg(long)]
    expect: Vec<String>,

    /// Print every skipped server-initiated message.
    #[arg(long)]
    verbose: bool,
}

/// One live probe connection with a call-id counter.
struct Probe {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: i64,
    verbose: bool,
}

impl Probe {
    async fn connect(url: &str, verbose: bool) -> Result<Self> {
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(AppError::Config(format!(
                "url must be ws:// or wss:// (got {url})"
            )));
        }
        let (ws, _) = connect_async(url)
            .await
            .map_err(|err| AppError::Transport(format!("connect failed: {err}")))?;
        Ok(Self {
            ws,
            next_id: 1,
            verbose,
        })
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        let frame = envelope.to_json()?;
        self.ws
            .send(Message::Text(frame))
            .await
            .map_err(|err| AppError::Transport(format!("send failed: {err}")))
    }

    /// Issue a call and await its correlated reply, skipping any
    /// server-initiated traffic that arrives in between.
    async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = json!(self.next_id);
        self.next_id += 1;
        self.send(&Envelope::request(id.clone(), method, Some(params)))
            .await?;

        loop {
            let message = self
                .ws
                .next()
                .await
                .ok_or_else(|| AppError::Transport("connection closed before reply".into()))?
                .map_err(|err| AppError::Transport(format!("receive failed: {err}")))?;

            let Message::Text(text) = message else {
                continue;
            };
            let envelope = Envelope::from_json(&text)?;

            if envelope.is_response() && envelope.id.as_ref() == Some(&id) {
                if let Some(error) = envelope.error {
                    return Err(AppError::Rpc(format!(
                        "{method} failed: {} (code {:?})",
                        error.message, error.code
                    )));
                }
                return Ok(envelope.result.unwrap_or(Value::Null));
            }

            if self.verbose {
                eprintln!("# skipping server message: {text}");
            }
        }
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        self.send(&Envelope::notification(method, Some(params)))
            .await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let mut probe = Probe::connect(&args.url, args.verbose).await?;

    // ── initialize ──────────────────────────────────────
    let t0 = Instant::now();
    let init = probe
        .call(
            "initialize",
            json!({
                "processId": null,
                "rootUri": "file:///probe",
                "capabilities": {
                    "textDocument": { "hover": { "contentFormat": ["markdown"] } }
                },
            }),
        )
        .await?;
    let init_elapsed = t0.elapsed();
    probe.notify("initialized", json!({})).await?;

    // ── open the document ───────────────────────────────
    probe
        .notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": args.uri,
                    "languageId": "python",
                    "version": 1,
                    "text": "",
                }
            }),
        )
        .await?;

    // ── hover ───────────────────────────────────────────
    let t1 = Instant::now();
    let hover = probe
        .call(
            "textDocument/hover",
            json!({
                "textDocument": { "uri": args.uri },
                "position": { "line": 0, "character": 0 },
            }),
        )
        .await?;
    let hover_elapsed = t1.elapsed();

    // ── report ──────────────────────────────────────────
    println!("Initialization\t{}", msec(init_elapsed));
    println!("Hover\t\t{}", msec(hover_elapsed));
    if args.verbose {
        println!("initialize result: {init}");
        println!("hover result: {hover}");
    }

    let hover_text = hover.to_string();
    let mut failed = false;
    for want in &args.expect {
        if hover_text.contains(want) {
            println!("Expect {want:?}\tpass");
        } else {
            println!("Expect {want:?}\tFAIL: not found in {hover_text}");
            failed = true;
        }
    }

    // Orderly shutdown; failures past this point are uninteresting.
    if probe.call("shutdown", Value::Null).await.is_ok() {
        let _ = probe.notify("exit", Value::Null).await;
    }

    if failed {
        return Err(AppError::Rpc("one or more expectations failed".into()));
    }
    Ok(())
}

fn msec(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}
