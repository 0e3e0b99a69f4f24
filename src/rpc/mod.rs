//! JSON-RPC 2.0 envelope model.
//!
//! The bridge treats payloads as opaque: only the envelope fields
//! needed for routing (`method`, `params`, `id`, and the
//! request/response distinction) are interpreted. Ids are carried as
//! raw [`serde_json::Value`]s and are never minted or renumbered —
//! downstream protocols such as `$/cancelRequest` depend on the
//! caller controlling the id.

pub mod codec;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Protocol version string carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// A single JSON-RPC 2.0 envelope: request, notification, or response.
///
/// One struct covers all three shapes; [`Envelope::is_call`],
/// [`Envelope::is_notification`], and [`Envelope::is_response`]
/// classify a parsed frame. A `result` of JSON `null` deserializes to
/// `None` and is normalized back to `Value::Null` when relayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Version marker, always `"2.0"`.
    pub jsonrpc: String,
    /// Request/response correlation id; absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name; present for requests and notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters, opaque to the bridge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Success payload of a response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload of a response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// JSON-RPC error object relayed inside a failed response.
///
/// `code` is optional on purpose: error replies synthesized from
/// unstructured transport failures carry a message only, and the
/// field is omitted from the wire rather than filled with a made-up
/// code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Numeric error code, when the failure is a structured protocol error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Human-readable failure description.
    pub message: String,
    /// Optional structured error payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    /// Build a message-only error for an unstructured failure.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            data: None,
        }
    }
}

impl Envelope {
    /// Build a call envelope carrying the caller-supplied id verbatim.
    #[must_use]
    pub fn request(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a notification envelope (no id, no reply expected).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a success response correlated to `id`.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Build a failure response correlated to `id`.
    #[must_use]
    pub fn failure(id: Value, error: ResponseError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// True when the envelope is a call: method plus id, expects one reply.
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    /// True when the envelope is a notification: method without id.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    /// True when the envelope is a response (no method field).
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.method.is_none()
    }

    /// Parse an envelope from a raw JSON frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rpc` when the frame is not a valid JSON-RPC
    /// envelope.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| AppError::Rpc(format!("malformed envelope: {err}")))
    }

    /// Serialize the envelope to a single-line JSON frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rpc` on serialization failure (should not
    /// occur for tree-shaped `Value`s).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|err| AppError::Rpc(format!("failed to serialize envelope: {err}")))
    }
}

/// Canonical map key for an id value.
///
/// JSON-RPC ids may be strings or numbers; the serialized form is
/// stable for both and keeps `1` and `"1"` distinct, so pending-call
/// maps keyed on it honour structural id equality.
#[must_use]
pub fn id_key(id: &Value) -> String {
    id.to_string()
}
