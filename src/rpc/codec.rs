//! Content-Length codec for subprocess stdio streams.
//!
//! Frames JSON-RPC envelopes the way language servers do on
//! stdin/stdout: an HTTP-style header block terminated by `\r\n\r\n`,
//! of which only `Content-Length` is interpreted, followed by exactly
//! that many bytes of UTF-8 JSON.
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"initialize", ...}
//! ```
//!
//! A configurable maximum frame size protects the bridge from
//! allocating unbounded memory for a single message from a
//! misbehaving server process.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Default maximum frame size accepted by the codec: 16 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Header block terminator.
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Content-Length framed codec for bidirectional stdio JSON-RPC.
///
/// # Decoder
///
/// Buffers until a complete header block and body are available.
/// Frames whose declared length exceeds the limit, or whose header
/// block is missing `Content-Length`, return [`AppError::Rpc`].
///
/// # Encoder
///
/// Outbound strings are prefixed with a `Content-Length` header. The
/// size limit is a decoder-side concern and is not enforced during
/// encoding.
#[derive(Debug)]
pub struct ContentLengthCodec {
    max_frame_bytes: usize,
    /// Body length parsed from the current header block, if the
    /// header has been consumed but the body is still incomplete.
    pending_len: Option<usize>,
}

impl ContentLengthCodec {
    /// Create a codec with the default [`DEFAULT_MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a codec with an explicit frame size limit.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending_len: None,
        }
    }

    /// Parse the header block and return the declared body length.
    fn parse_header(&self, header: &[u8]) -> Result<usize> {
        let text = std::str::from_utf8(header)
            .map_err(|_| AppError::Rpc("frame header is not valid UTF-8".into()))?;

        for line in text.split("\r\n") {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let len: usize = value
                    .trim()
                    .parse()
                    .map_err(|_| AppError::Rpc(format!("invalid content-length: {value}")))?;
                if len > self.max_frame_bytes {
                    return Err(AppError::Rpc(format!(
                        "frame too large: {len} bytes exceeds {} byte limit",
                        self.max_frame_bytes
                    )));
                }
                return Ok(len);
            }
        }

        Err(AppError::Rpc("missing content-length header".into()))
    }
}

impl Default for ContentLengthCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ContentLengthCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if self.pending_len.is_none() {
            let Some(pos) = src
                .windows(HEADER_END.len())
                .position(|window| window == HEADER_END)
            else {
                // Header block still incomplete. An unterminated
                // header longer than the frame limit can never
                // become valid.
                if src.len() > self.max_frame_bytes {
                    return Err(AppError::Rpc("unterminated frame header".into()));
                }
                return Ok(None);
            };

            let header = src.split_to(pos + HEADER_END.len());
            let len = self.parse_header(&header[..pos])?;
            self.pending_len = Some(len);
        }

        // Invariant: pending_len is set past this point.
        let Some(len) = self.pending_len else {
            return Ok(None);
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let body = src.split_to(len);
        self.pending_len = None;

        let frame = String::from_utf8(body.to_vec())
            .map_err(|_| AppError::Rpc("frame body is not valid UTF-8".into()))?;
        Ok(Some(frame))
    }
}

impl Encoder<String> for ContentLengthCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        let header = format!("Content-Length: {}\r\n\r\n", item.len());
        dst.reserve(header.len() + item.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}
