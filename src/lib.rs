#![forbid(unsafe_code)]

//! `rpc-bridge` — bidirectional JSON-RPC 2.0 bridge between a
//! WebSocket-connected peer (typically a browser-based editor client)
//! and a spawned subprocess speaking Content-Length framed JSON-RPC
//! over its stdin/stdout, the common language-server wire convention.

pub mod config;
pub mod errors;
pub mod gateway;
pub mod peer;
pub mod process;
pub mod rpc;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
