//! WebSocket connection gateway.
//!
//! Thin axum layer around the proxy session: each accepted upgrade
//! spawns one server process, wraps both transports as peer
//! connections, and runs one session until it closes. The server
//! process is spawned *before* the upgrade completes so that a spawn
//! failure surfaces as an HTTP 500 and never creates a session — or
//! leaks a subprocess.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocket;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::peer::transport::websocket_frames;
use crate::process::ServerProcess;
use crate::{session, AppError, GlobalConfig, Result};

/// Shared gateway state: the immutable configuration.
#[derive(Clone)]
pub struct GatewayState {
    /// Validated global configuration.
    pub config: Arc<GlobalConfig>,
}

/// Handler for `GET /health` — liveness probe, no session involved.
async fn health() -> &'static str {
    "ok"
}

/// Handler for `GET /` — upgrades to WebSocket and starts a session.
async fn upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    let process = match ServerProcess::spawn(&state.config.server_command, &state.config.server_args)
    {
        Ok(process) => process,
        Err(err) => {
            error!(%err, "refusing connection: server spawn failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let max_frame_bytes = state.config.max_frame_bytes;
    ws.on_upgrade(move |socket| handle_socket(socket, process, max_frame_bytes))
        .into_response()
}

/// Drive one proxy session over an accepted socket.
async fn handle_socket(socket: WebSocket, process: ServerProcess, max_frame_bytes: usize) {
    let conn_id = Uuid::new_v4();
    info!(conn = %conn_id, "connection opened");

    let upstream = websocket_frames(socket);
    if let Err(err) = session::run(conn_id, upstream, process, max_frame_bytes).await {
        error!(conn = %conn_id, %err, "session setup failed");
    }

    info!(conn = %conn_id, "connection closed");
}

/// Build the gateway router.
#[must_use]
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve the gateway on the configured listen address until `ct`
/// fires.
///
/// # Errors
///
/// Returns `AppError::Config` when the address cannot be bound, or
/// `AppError::Transport` when the HTTP server fails.
pub async fn serve(config: Arc<GlobalConfig>, ct: CancellationToken) -> Result<()> {
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|err| AppError::Config(format!("invalid listen address: {err}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {addr}: {err}")))?;
    serve_with_listener(listener, config, ct).await
}

/// Serve the gateway on an already-bound listener.
///
/// Split out so tests can bind an ephemeral port first and read the
/// local address back.
///
/// # Errors
///
/// Returns `AppError::Transport` when the HTTP server fails.
pub async fn serve_with_listener(
    listener: TcpListener,
    config: Arc<GlobalConfig>,
    ct: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(
            %addr,
            command = config.server_command,
            "gateway listening, forwarding to server stdio"
        );
    }

    let app = router(GatewayState { config });
    axum::serve(listener, app)
        .with_graceful_shutdown(ct.cancelled_owned())
        .await
        .map_err(|err| AppError::Transport(format!("gateway server failed: {err}")))
}
