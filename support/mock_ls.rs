#![forbid(unsafe_code)]

//! `mock-ls` — a minimal stdio JSON-RPC server for exercising the
//! bridge.
//!
//! Speaks Content-Length framed JSON-RPC 2.0 over stdin/stdout the
//! way a language server does. Answers `initialize` and
//! `textDocument/hover`, returns `-32601` for unknown calls, and
//! offers failure-mode flags for crash and teardown tests. Plain
//! blocking I/O on purpose: the process under test stays trivial.

use std::io::{Read, Write};

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Mock language server for integration testing.
#[derive(Debug, Parser)]
#[command(name = "mock-ls", about = "Content-Length framed JSON-RPC mock server")]
struct Args {
    /// Exit immediately after answering `initialize` (simulate crash).
    #[arg(long)]
    exit_after_initialize: bool,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,
}

/// Inbound JSON-RPC request or notification.
#[derive(Debug, Deserialize)]
struct Request {
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// Outbound JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// Outbound JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

fn main() -> std::process::ExitCode {
    let args = Args::parse();
    let stdin = std::io::stdin();
    let mut reader = stdin.lock();

    loop {
        let body = match read_frame(&mut reader) {
            Ok(Some(body)) => body,
            // EOF or a framing error: the bridge hung up.
            Ok(None) | Err(_) => return std::process::ExitCode::SUCCESS,
        };

        let Ok(request) = serde_json::from_str::<Request>(&body) else {
            eprintln!("mock-ls: skipping malformed frame");
            continue;
        };
        let method = request.method.unwrap_or_default();

        if args.hang_on.iter().any(|m| m == &method) {
            continue;
        }

        let Some(id) = request.id else {
            // Notification; `exit` is the only one acted upon.
            if method == "exit" {
                return std::process::ExitCode::SUCCESS;
            }
            continue;
        };

        let response = respond(&method, &request.params, id);
        if write_frame(&response).is_err() {
            return std::process::ExitCode::FAILURE;
        }

        if method == "initialize" && args.exit_after_initialize {
            return std::process::ExitCode::SUCCESS;
        }
    }
}

/// Build the response for one call.
fn respond(method: &str, params: &Value, id: Value) -> Response {
    let result = match method {
        "initialize" => Some(json!({
            "capabilities": { "hoverProvider": true },
            "rootUri": params.get("rootUri").cloned().unwrap_or(Value::Null),
        })),
        "textDocument/hover" => {
            let uri = params
                .pointer("/textDocument/uri")
                .and_then(Value::as_str)
                .unwrap_or("<unknown>");
            Some(json!({ "contents": format!("mock hover for {uri}") }))
        }
        "shutdown" => Some(Value::Null),
        _ => None,
    };

    match result {
        Some(result) => Response {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        },
        None => Response {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code: -32601,
                message: "method not found".into(),
            }),
        },
    }
}

/// Read one Content-Length framed message; `None` on clean EOF.
fn read_frame(reader: &mut impl Read) -> std::io::Result<Option<String>> {
    let mut header = Vec::new();
    let mut byte = [0u8; 1];

    while !header.ends_with(b"\r\n\r\n") {
        match reader.read(&mut byte)? {
            0 => return Ok(None),
            _ => header.push(byte[0]),
        }
    }

    let text = String::from_utf8(header)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 header"))?;
    let len = text
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "missing content-length")
        })?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    String::from_utf8(body)
        .map(Some)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 body"))
}

/// Write one Content-Length framed response to stdout.
fn write_frame(response: &Response) -> std::io::Result<()> {
    let body = serde_json::to_string(response)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "Content-Length: {}\r\n\r\n{}", body.len(), body)?;
    stdout.flush()
}
