//! JSON-RPC 2.0 framing for the downstream wire.
//!
//! One outbound shape covers both requests and notifications: a frame with
//! an id expects a reply routed back through the pending table, a frame
//! without one is fire-and-forget. Inbound frames are parsed leniently —
//! downstream servers answer with string ids, null ids, or no id at all,
//! and none of that may fail the parse; only numeric ids are routable.

use serde::{Deserialize, Deserializer, Serialize};

/// An outbound JSON-RPC frame.
///
/// Serialized to a single line; `id: None` makes it a notification.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// A request expecting a reply under `id`.
    pub fn call(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// A notification: no id, no reply expected.
    pub fn notification(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// An inbound JSON-RPC frame.
///
/// `id` survives only when numeric: the transport allocated every id it can
/// route, so string and null ids mark the frame as unroutable without
/// failing the parse (the reader discards those at debug).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default, deserialize_with = "routable_id")]
    pub id: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Split the frame into its outcome: the `result` payload, or the error
    /// object when the downstream reported one. A frame carrying neither
    /// resolves to `null`.
    pub fn into_outcome(self) -> Result<serde_json::Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

/// The error object of a failed response, forwarded verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

fn routable_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(serde_json::Value::deserialize(deserializer)?.as_u64())
}
