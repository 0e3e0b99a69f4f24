//! Live peer connection bound to exactly one transport.
//!
//! A [`PeerConnection`] owns two background tasks: a writer draining
//! the outbound channel into the transport sink, and a dispatch loop
//! reading inbound frames, resolving pending calls, and forwarding
//! calls/notifications to the session. The disconnect token fires
//! exactly once — on remote close, local [`PeerConnection::close`],
//! or transport error — and failing transports drain every pending
//! call as [`CallFailure::Disconnected`] so nothing hangs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CallFailure, CallPeer, FrameSink, FrameStream, InboundMessage, ReplyPeer};
use crate::rpc::{id_key, Envelope, ResponseError};
use crate::{AppError, Result};

/// Outbound channel depth; outbound frames are small and drained fast.
const OUTBOUND_BUFFER: usize = 64;

/// Resolution of one pending call: result payload or peer error object.
type ReplyOutcome = std::result::Result<Value, ResponseError>;

/// Waiters for in-flight calls, keyed on the canonical id string.
type PendingCalls = Arc<Mutex<HashMap<String, oneshot::Sender<ReplyOutcome>>>>;

/// One side of the proxy: a JSON-RPC peer bound to a single transport.
///
/// Cheap to clone; all clones share the same transport tasks and
/// disconnect signal.
#[derive(Clone)]
pub struct PeerConnection {
    /// `"upstream"` or `"downstream"`, for log correlation only.
    label: &'static str,
    out_tx: mpsc::Sender<String>,
    pending: PendingCalls,
    disconnect: CancellationToken,
}

impl PeerConnection {
    /// Bind a peer to a transport and start its background tasks.
    ///
    /// Inbound calls and notifications are delivered through
    /// `inbound_tx`; the receiving dispatch handler runs immediately,
    /// so the session must gate routing on its readiness signal until
    /// the opposite peer exists.
    #[must_use]
    pub fn start(
        label: &'static str,
        stream: FrameStream,
        sink: FrameSink,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Self {
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let disconnect = CancellationToken::new();

        tokio::spawn(run_writer(label, sink, out_rx, disconnect.clone()));
        tokio::spawn(run_dispatch(
            label,
            stream,
            inbound_tx,
            Arc::clone(&pending),
            disconnect.clone(),
        ));

        Self {
            label,
            out_tx,
            pending,
            disconnect,
        }
    }

    /// Clone of the one-shot disconnect signal.
    #[must_use]
    pub fn disconnect_signal(&self) -> CancellationToken {
        self.disconnect.clone()
    }

    /// Close the connection locally.
    ///
    /// Idempotent: the disconnect signal fires at most once no matter
    /// how often close is observed or invoked.
    pub fn close(&self) {
        self.disconnect.cancel();
    }

    /// Queue an envelope for the writer task.
    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let frame = envelope.to_json()?;
        self.out_tx.send(frame).await.map_err(|_| {
            AppError::Transport(format!("{} peer is no longer writable", self.label))
        })
    }
}

#[async_trait]
impl ReplyPeer for PeerConnection {
    async fn reply(&self, id: Value, result: Value) -> Result<()> {
        self.send(&Envelope::success(id, result)).await
    }

    async fn reply_with_error(&self, id: Value, error: ResponseError) -> Result<()> {
        self.send(&Envelope::failure(id, error)).await
    }
}

#[async_trait]
impl CallPeer for PeerConnection {
    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        id: Value,
    ) -> std::result::Result<Value, CallFailure> {
        let key = id_key(&id);
        let (reply_tx, reply_rx) = oneshot::channel();

        // Register the waiter before the frame leaves, so a reply
        // racing back immediately still finds it.
        self.pending.lock().await.insert(key.clone(), reply_tx);

        if let Err(err) = self.send(&Envelope::request(id, method, params)).await {
            self.pending.lock().await.remove(&key);
            return Err(CallFailure::Transport(err.to_string()));
        }

        tokio::select! {
            biased;

            outcome = reply_rx => match outcome {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(error)) => Err(CallFailure::Rpc(error)),
                Err(_) => Err(CallFailure::Disconnected),
            },

            () = self.disconnect.cancelled() => {
                self.pending.lock().await.remove(&key);
                Err(CallFailure::Disconnected)
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.send(&Envelope::notification(method, params)).await
    }
}

/// Writer task — drains the outbound channel into the transport sink.
///
/// A write failure is a transport error and fires the disconnect
/// signal; local close stops the writer after closing the sink so the
/// remote end observes an orderly shutdown.
async fn run_writer(
    label: &'static str,
    mut sink: FrameSink,
    mut out_rx: mpsc::Receiver<String>,
    disconnect: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = disconnect.cancelled() => {
                debug!(peer = label, "writer: disconnect observed, closing sink");
                break;
            }

            frame = out_rx.recv() => {
                let Some(frame) = frame else {
                    debug!(peer = label, "writer: outbound channel closed");
                    break;
                };
                if let Err(err) = sink.send(frame).await {
                    warn!(peer = label, error = %err, "writer: transport write failed");
                    disconnect.cancel();
                    break;
                }
            }
        }
    }

    if let Err(err) = sink.close().await {
        debug!(peer = label, error = %err, "writer: sink close failed");
    }
}

/// Dispatch task — reads inbound frames until the transport ends.
///
/// Responses resolve their pending call; calls and notifications go
/// to the session. On exit every remaining pending call is dropped,
/// which resolves it as disconnected.
async fn run_dispatch(
    label: &'static str,
    mut stream: FrameStream,
    inbound_tx: mpsc::Sender<InboundMessage>,
    pending: PendingCalls,
    disconnect: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = disconnect.cancelled() => {
                debug!(peer = label, "dispatch: disconnect observed, stopping");
                break;
            }

            item = stream.next() => {
                match item {
                    None => {
                        debug!(peer = label, "dispatch: transport closed by remote");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(peer = label, error = %err, "dispatch: transport error");
                        break;
                    }
                    Some(Ok(frame)) => {
                        if !handle_frame(label, &frame, &inbound_tx, &pending).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    disconnect.cancel();
    // Dropping the waiters resolves every in-flight call as
    // disconnected rather than letting it hang.
    pending.lock().await.clear();
}

/// Route one raw frame. Returns `false` when dispatch must stop.
async fn handle_frame(
    label: &'static str,
    frame: &str,
    inbound_tx: &mpsc::Sender<InboundMessage>,
    pending: &PendingCalls,
) -> bool {
    let envelope = match Envelope::from_json(frame) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(peer = label, error = %err, "dispatch: skipping malformed frame");
            return true;
        }
    };

    if envelope.is_response() {
        resolve_pending(label, envelope, pending).await;
        return true;
    }

    let Some(method) = envelope.method else {
        return true;
    };
    let message = InboundMessage {
        method,
        params: envelope.params,
        id: envelope.id,
    };

    if inbound_tx.send(message).await.is_err() {
        debug!(peer = label, "dispatch: session handler gone, stopping");
        return false;
    }
    true
}

/// Resolve the pending call correlated to a response envelope.
async fn resolve_pending(label: &'static str, envelope: Envelope, pending: &PendingCalls) {
    let Some(id) = envelope.id else {
        warn!(peer = label, "dispatch: response without id, dropping");
        return;
    };
    let key = id_key(&id);

    let Some(waiter) = pending.lock().await.remove(&key) else {
        warn!(peer = label, id = %key, "dispatch: response for unknown call, dropping");
        return;
    };

    let outcome = match envelope.error {
        Some(error) => Err(error),
        // A JSON `null` result parses as absent; normalize it back.
        None => Ok(envelope.result.unwrap_or(Value::Null)),
    };

    // The caller may have given up already (its side disconnected);
    // that is not an error here.
    let _ = waiter.send(outcome);
}
