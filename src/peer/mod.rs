//! Peer connection abstraction over a duplex JSON-RPC transport.
//!
//! A [`connection::PeerConnection`] wraps one transport — WebSocket
//! frames upstream, Content-Length framed stdio downstream — and
//! exposes `call` / `notify` / `reply` plus a one-shot disconnect
//! signal. The proxy session consumes the two sides through narrowed
//! traits: [`ReplyPeer`] on the originating side (the session only
//! ever replies to the peer a message came from) and [`CallPeer`] on
//! the opposite side.

pub mod connection;
pub mod transport;

use std::fmt::{Display, Formatter};
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, Stream};
use serde_json::Value;

use crate::rpc::ResponseError;
use crate::Result;

/// Boxed stream of raw inbound JSON frames from a transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Boxed sink of raw outbound JSON frames toward a transport.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = crate::AppError> + Send>>;

/// An inbound call or notification dispatched to the session.
#[derive(Debug)]
pub struct InboundMessage {
    /// Method name from the envelope.
    pub method: String,
    /// Opaque parameters, forwarded untouched.
    pub params: Option<Value>,
    /// Originator's id; `None` marks a notification.
    pub id: Option<Value>,
}

impl InboundMessage {
    /// True when no reply is expected.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Failure of a forwarded call.
#[derive(Debug)]
pub enum CallFailure {
    /// The peer answered with a structured protocol error; relayed verbatim.
    Rpc(ResponseError),
    /// The transport closed before a correlated reply arrived.
    Disconnected,
    /// The call could not be sent.
    Transport(String),
}

impl Display for CallFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rpc(err) => write!(f, "peer error: {}", err.message),
            Self::Disconnected => write!(f, "peer disconnected before reply"),
            Self::Transport(msg) => write!(f, "transport failure: {msg}"),
        }
    }
}

/// Reply-only capability used on the side a message originated from.
#[async_trait]
pub trait ReplyPeer: Send + Sync {
    /// Deliver a success reply correlated to `id`.
    async fn reply(&self, id: Value, result: Value) -> Result<()>;

    /// Deliver an error reply correlated to `id`.
    async fn reply_with_error(&self, id: Value, error: ResponseError) -> Result<()>;
}

/// Call/notify capability used on the side a message is forwarded to.
#[async_trait]
pub trait CallPeer: Send + Sync {
    /// Issue a call under the caller-supplied `id` and await the
    /// correlated reply.
    ///
    /// # Errors
    ///
    /// Returns [`CallFailure::Rpc`] when the peer answers with an
    /// error response, [`CallFailure::Disconnected`] when the
    /// transport closes first, and [`CallFailure::Transport`] when
    /// the call cannot be sent at all.
    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        id: Value,
    ) -> std::result::Result<Value, CallFailure>;

    /// Send a fire-and-forget notification.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;
}
