//! Proxy session — the bidirectional round-trip forwarding core.
//!
//! A session pairs exactly one upstream (client-facing) peer with one
//! downstream (subprocess-facing) peer and forwards traffic between
//! them until either side disconnects:
//!
//! - Notifications are forwarded inline from the routing loop, which
//!   preserves same-peer notification ordering.
//! - Each call is forwarded as an independent task under the
//!   originator's untouched id, so calls in flight never block one
//!   another and replies correlate per id even when they arrive out
//!   of issuance order.
//! - Routing is gated on a single-fire readiness signal: both peers
//!   start dispatching the moment they are constructed, but nothing
//!   is routed until both exist.
//!
//! Lifecycle: `Constructing → Ready → Draining → Closed`. The first
//! disconnect signal wins the teardown race; the opposite peer and
//! the server process group are then closed exactly once.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::peer::connection::PeerConnection;
use crate::peer::transport::stdio_frames;
use crate::peer::{CallFailure, CallPeer, FrameSink, FrameStream, InboundMessage, ReplyPeer};
use crate::process::ServerProcess;
use crate::rpc::ResponseError;
use crate::Result;

/// Inbound routing channel depth per peer.
const INBOUND_BUFFER: usize = 64;

/// Run a session over an upstream transport and a freshly spawned
/// server process, until the session is closed.
///
/// # Errors
///
/// Returns `AppError::Spawn` when the process stdio was already
/// taken; every later failure is handled inside the session and
/// converted into error replies or teardown.
pub async fn run(
    conn_id: Uuid,
    upstream: (FrameStream, FrameSink),
    mut process: ServerProcess,
    max_frame_bytes: usize,
) -> Result<()> {
    let (stdout, stdin) = match process.take_stdio() {
        Ok(stdio) => stdio,
        Err(err) => {
            process.close();
            return Err(err);
        }
    };
    let downstream = stdio_frames(stdout, stdin, max_frame_bytes);
    run_with_transports(conn_id, upstream, downstream, process).await;
    Ok(())
}

/// Run a session over two already-framed transports.
///
/// Split out from [`run`] so tests can drive the session over
/// in-memory pipes on both sides.
pub async fn run_with_transports(
    conn_id: Uuid,
    upstream: (FrameStream, FrameSink),
    downstream: (FrameStream, FrameSink),
    mut process: ServerProcess,
) {
    debug!(conn = %conn_id, "session constructing");

    // Single-fire readiness gate: dispatch handlers exist before the
    // opposite peer does, so they block here until both are up.
    let ready = CancellationToken::new();

    let (up_tx, up_rx) = mpsc::channel(INBOUND_BUFFER);
    let (down_tx, down_rx) = mpsc::channel(INBOUND_BUFFER);

    let (up_stream, up_sink) = upstream;
    let (down_stream, down_sink) = downstream;
    let up_peer = PeerConnection::start("upstream", up_stream, up_sink, up_tx);
    let down_peer = PeerConnection::start("downstream", down_stream, down_sink, down_tx);

    let up_router = tokio::spawn(route_inbound(
        "upstream",
        up_rx,
        up_peer.clone(),
        down_peer.clone(),
        ready.clone(),
    ));
    let down_router = tokio::spawn(route_inbound(
        "downstream",
        down_rx,
        down_peer.clone(),
        up_peer.clone(),
        ready.clone(),
    ));

    // Both peer connections exist; open the gate.
    ready.cancel();
    info!(conn = %conn_id, "session ready");

    let up_disconnect = up_peer.disconnect_signal();
    let down_disconnect = down_peer.disconnect_signal();

    // First disconnect wins; the loser's close below is idempotent.
    tokio::select! {
        () = up_disconnect.cancelled() => {
            info!(conn = %conn_id, "upstream disconnected, draining");
            down_peer.close();
        }
        () = down_disconnect.cancelled() => {
            info!(conn = %conn_id, "downstream disconnected, draining");
            up_peer.close();
        }
    }

    up_peer.close();
    down_peer.close();

    // Even when the downstream transport already failed, the group
    // kill is still required: the process may be hung rather than
    // exited.
    process.close();

    let _ = tokio::join!(up_router, down_router);
    info!(conn = %conn_id, "session closed");
}

/// Per-peer routing loop.
///
/// Waits on the readiness gate, then forwards notifications inline
/// and spawns a round-trip task per call.
async fn route_inbound(
    origin: &'static str,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    from: PeerConnection,
    to: PeerConnection,
    ready: CancellationToken,
) {
    while let Some(message) = inbound_rx.recv().await {
        ready.cancelled().await;

        if message.is_notification() {
            forward_notification(origin, &to, message).await;
        } else {
            let from = from.clone();
            let to = to.clone();
            tokio::spawn(async move {
                round_trip(origin, &from, &to, message).await;
            });
        }
    }
    debug!(peer = origin, "routing loop stopped");
}

/// Forward a notification to the opposite peer.
///
/// The originator never receives a reply for a notification, so a
/// forwarding failure is logged and goes no further.
async fn forward_notification(origin: &'static str, to: &impl CallPeer, message: InboundMessage) {
    debug!(
        origin,
        method = message.method,
        params = ?message.params,
        "forwarding notification"
    );
    if let Err(err) = to.notify(&message.method, message.params).await {
        warn!(origin, method = message.method, %err, "notification forward failed");
    }
}

/// Forward one call to the opposite peer and relay its reply back.
///
/// The call is issued under the identical id supplied by the
/// originator — never regenerated, since downstream conventions such
/// as `$/cancelRequest` depend on the caller controlling the id. A
/// structured error from the opposite peer is relayed verbatim; any
/// other failure becomes a message-only error reply, without an
/// invented error code.
pub async fn round_trip(
    origin: &'static str,
    from: &impl ReplyPeer,
    to: &impl CallPeer,
    message: InboundMessage,
) {
    let InboundMessage { method, params, id } = message;
    let Some(id) = id else {
        // Notifications take the inline path; this is a routing bug,
        // not a protocol condition.
        warn!(origin, method, "round_trip invoked without id");
        return;
    };

    debug!(origin, method, params = ?params, id = %id, "forwarding call");

    match to.call(&method, params, id.clone()).await {
        Ok(result) => {
            debug!(origin, method, id = %id, result = %result, "call succeeded");
            if let Err(err) = from.reply(id, result).await {
                warn!(origin, method, %err, "reply delivery failed");
            }
        }
        Err(failure) => {
            warn!(origin, method, id = %id, %failure, "call failed");
            let error = match failure {
                CallFailure::Rpc(error) => error,
                other => ResponseError::from_message(other.to_string()),
            };
            if let Err(err) = from.reply_with_error(id, error).await {
                warn!(origin, method, %err, "error reply delivery failed");
            }
        }
    }
}
