//! Integration tests for downstream server process management.
//!
//! Uses real processes (`cat`, `sleep`) so the piped stdio, the group
//! kill, and the spawn failure paths are all exercised for real.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;

use rpc_bridge::peer::transport::stdio_frames;
use rpc_bridge::process::ServerProcess;
use rpc_bridge::AppError;

const MAX_FRAME_BYTES: usize = 1024 * 1024;

// ── Spawn and stdio ─────────────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn spawned_process_stdio_carries_frames_both_ways() {
    let mut process = ServerProcess::spawn("cat", &[]).expect("spawn cat");
    let (stdout, stdin) = process.take_stdio().expect("take stdio");
    let (mut stream, mut sink) = stdio_frames(stdout, stdin, MAX_FRAME_BYTES);

    // cat echoes the framed bytes back unchanged.
    sink.send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_owned())
        .await
        .expect("write frame");

    let echoed = timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("echo within 5s")
        .expect("stdout open")
        .expect("frame decodes");
    assert_eq!(echoed, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);

    process.close();
}

#[tokio::test]
async fn spawn_of_missing_binary_fails_without_a_session() {
    let err = ServerProcess::spawn("definitely-not-a-real-binary-4288", &[])
        .expect_err("spawn must fail");
    assert!(
        matches!(err, AppError::Spawn(_)),
        "expected a spawn error, got {err}"
    );
}

#[tokio::test]
async fn stdio_can_only_be_taken_once() {
    let mut process = ServerProcess::spawn("sleep", &["30".to_owned()]).expect("spawn sleep");
    process.take_stdio().expect("first take succeeds");
    let err = process.take_stdio().expect_err("second take must fail");
    assert!(matches!(err, AppError::Spawn(_)));
    process.close();
}

// ── Teardown ────────────────────────────────────────────────────────

#[tokio::test]
async fn close_is_idempotent() {
    let mut process = ServerProcess::spawn("sleep", &["30".to_owned()]).expect("spawn sleep");
    process.close();
    // A second close on an already-killed process must be a no-op.
    process.close();
}

#[cfg(unix)]
#[tokio::test]
async fn close_ends_a_long_running_process() {
    let mut process = ServerProcess::spawn("sleep", &["30".to_owned()]).expect("spawn sleep");
    let (stdout, _stdin) = process.take_stdio().expect("take stdio");
    let (mut stream, _sink) = stdio_frames(stdout, tokio::io::sink(), MAX_FRAME_BYTES);

    process.close();

    // The group kill shows up as EOF on the process's stdout.
    let ended = timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stdout closes after kill");
    assert!(
        !matches!(ended, Some(Ok(_))),
        "no frame may arrive after close"
    );
}
