//! Frame adapters binding concrete transports to [`FrameStream`] /
//! [`FrameSink`].
//!
//! Upstream: one JSON-RPC envelope per WebSocket text frame.
//! Downstream: Content-Length framed envelopes over any duplex byte
//! stream, in practice the subprocess's stdin/stdout.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::warn;

use super::{FrameSink, FrameStream};
use crate::rpc::codec::ContentLengthCodec;
use crate::AppError;

/// Adapt an accepted WebSocket into text-frame stream and sink halves.
///
/// Binary frames are not part of the protocol and are dropped with a
/// warning; ping/pong and close frames are handled by the transport
/// layer and filtered out here.
#[must_use]
pub fn websocket_frames(socket: WebSocket) -> (FrameStream, FrameSink) {
    let (sink, stream) = socket.split();

    let stream = stream.filter_map(|item| async move {
        match item {
            Ok(Message::Text(text)) => Some(Ok(text.to_string())),
            Ok(Message::Binary(_)) => {
                warn!("ignoring binary websocket frame");
                None
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
            Err(err) => Some(Err(AppError::Transport(err.to_string()))),
        }
    });

    let sink = sink
        .sink_map_err(|err| AppError::Transport(err.to_string()))
        .with(|frame: String| {
            futures_util::future::ready(Ok::<Message, AppError>(Message::Text(frame.into())))
        });

    (Box::pin(stream), Box::pin(sink))
}

/// Adapt a duplex byte stream into Content-Length framed halves.
///
/// Used for the subprocess's stdout/stdin pair, and by tests over
/// in-memory pipes.
#[must_use]
pub fn stdio_frames<R, W>(reader: R, writer: W, max_frame_bytes: usize) -> (FrameStream, FrameSink)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let stream = FramedRead::new(
        reader,
        ContentLengthCodec::with_max_frame_bytes(max_frame_bytes),
    );
    let sink = FramedWrite::new(
        writer,
        ContentLengthCodec::with_max_frame_bytes(max_frame_bytes),
    );
    (Box::pin(stream), Box::pin(sink))
}
