//! Unit tests for the Content-Length stdio codec.
//!
//! Covers:
//! - single framed message decodes correctly
//! - batched frames are each decoded
//! - partial delivery is buffered until the frame completes
//! - missing Content-Length header is an error
//! - declared length above the limit is an error
//! - encoding produces the exact header + body wire form

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use rpc_bridge::rpc::codec::ContentLengthCodec;
use rpc_bridge::AppError;

/// Frame a body the way a language server does.
fn frame(body: &str) -> String {
    format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
}

// ── Single framed message decodes correctly ─────────────────────────

#[test]
fn single_frame_decodes_correctly() {
    let mut codec = ContentLengthCodec::new();
    let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
    let mut buf = BytesMut::from(frame(body).as_str());

    let result = codec
        .decode(&mut buf)
        .expect("decode must succeed for a valid frame");

    assert_eq!(result.as_deref(), Some(body));
    assert!(buf.is_empty(), "the frame must be fully consumed");
}

// ── Batched frames are each decoded ─────────────────────────────────

#[test]
fn batched_frames_are_each_decoded() {
    let mut codec = ContentLengthCodec::new();
    let raw = format!("{}{}", frame(r#"{"id":1}"#), frame(r#"{"id":2}"#));
    let mut buf = BytesMut::from(raw.as_str());

    let first = codec.decode(&mut buf).expect("first decode must succeed");
    assert_eq!(first.as_deref(), Some(r#"{"id":1}"#));

    let second = codec.decode(&mut buf).expect("second decode must succeed");
    assert_eq!(second.as_deref(), Some(r#"{"id":2}"#));

    let third = codec.decode(&mut buf).expect("empty buffer must not error");
    assert!(third.is_none(), "no further frames must be present");
}

// ── Partial delivery is buffered until the frame completes ──────────

#[test]
fn partial_header_is_buffered() {
    let mut codec = ContentLengthCodec::new();
    let mut buf = BytesMut::from("Content-Length: 8\r\n");

    let result = codec
        .decode(&mut buf)
        .expect("partial header must not error");
    assert!(result.is_none(), "incomplete header must not emit a frame");

    buf.extend_from_slice(b"\r\n{\"id\":1}");
    let result = codec
        .decode(&mut buf)
        .expect("decode must succeed once the frame completes");
    assert_eq!(result.as_deref(), Some(r#"{"id":1}"#));
}

#[test]
fn partial_body_is_buffered() {
    let mut codec = ContentLengthCodec::new();
    let mut buf = BytesMut::from("Content-Length: 8\r\n\r\n{\"id\"");

    let result = codec.decode(&mut buf).expect("partial body must not error");
    assert!(result.is_none(), "incomplete body must not emit a frame");

    buf.extend_from_slice(b":1}");
    let result = codec
        .decode(&mut buf)
        .expect("decode must succeed once the body completes");
    assert_eq!(result.as_deref(), Some(r#"{"id":1}"#));
}

// ── Missing Content-Length header is an error ───────────────────────

#[test]
fn missing_content_length_is_an_error() {
    let mut codec = ContentLengthCodec::new();
    let mut buf = BytesMut::from("Content-Type: application/json\r\n\r\n{}");

    let err = codec
        .decode(&mut buf)
        .expect_err("a header block without content-length must fail");
    assert!(
        matches!(err, AppError::Rpc(ref msg) if msg.contains("content-length")),
        "unexpected error: {err}"
    );
}

// ── Declared length above the limit is an error ─────────────────────

#[test]
fn oversize_frame_is_rejected() {
    let mut codec = ContentLengthCodec::with_max_frame_bytes(64);
    let mut buf = BytesMut::from("Content-Length: 65\r\n\r\n");

    let err = codec
        .decode(&mut buf)
        .expect_err("a frame above the limit must fail before allocation");
    assert!(
        matches!(err, AppError::Rpc(ref msg) if msg.contains("frame too large")),
        "unexpected error: {err}"
    );
}

// ── Encoding produces the exact wire form ───────────────────────────

#[test]
fn encode_produces_header_and_body() {
    let mut codec = ContentLengthCodec::new();
    let mut buf = BytesMut::new();

    codec
        .encode(r#"{"id":1}"#.to_owned(), &mut buf)
        .expect("encode must succeed");

    assert_eq!(&buf[..], b"Content-Length: 8\r\n\r\n{\"id\":1}");
}

#[test]
fn encode_then_decode_round_trips() {
    let mut codec = ContentLengthCodec::new();
    let mut buf = BytesMut::new();
    let body = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;

    codec
        .encode(body.to_owned(), &mut buf)
        .expect("encode must succeed");
    let decoded = codec.decode(&mut buf).expect("decode must succeed");

    assert_eq!(decoded.as_deref(), Some(body));
}
