//! Wire-level envelopes (JSON-RPC 2.0) and the frame codec shared by every transport.

use serde::{Deserialize, Serialize};
use serde_json::Value as J;

use super::error::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revisions this server speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

pub const SERVER_NAME: &str = "vex-mcp-server";

/// Opaque correlation token. Strings or integers, never `null`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Option<J>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<J>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Incoming {
    Request(RpcRequest),
    Notification(RpcNotification),
}

impl Incoming {
    pub fn method(&self) -> &str {
        match self {
            Self::Request(r) => &r.method,
            Self::Notification(n) => &n.method,
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Notification(_) => None,
        }
    }
}

/// Exactly one of `result` or `error`; the enum makes "both" and "neither" unrepresentable.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    Result(J),
    Error(RpcError),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    /// `None` serializes as `null`, used only when no id could be recovered.
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl RpcResponse {
    pub fn result(&self) -> Option<&J> {
        match &self.payload {
            Payload::Result(v) => Some(v),
            Payload::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        match &self.payload {
            Payload::Result(_) => None,
            Payload::Error(e) => Some(e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    /// Serialize as a single line (serde_json never emits raw newlines).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub fn ok(id: RequestId, result: J) -> RpcResponse {
    RpcResponse { jsonrpc: JSONRPC_VERSION, id: Some(id), payload: Payload::Result(result) }
}

pub fn err(id: Option<RequestId>, error: RpcError) -> RpcResponse {
    RpcResponse { jsonrpc: JSONRPC_VERSION, id, payload: Payload::Error(error) }
}

/// A frame that could not be decoded, with whatever id was recoverable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", .error.message)]
pub struct DecodeError {
    pub id: Option<RequestId>,
    pub error: RpcError,
}

impl DecodeError {
    fn new(id: Option<RequestId>, error: RpcError) -> Self {
        Self { id, error }
    }

    pub fn into_response(self) -> RpcResponse {
        err(self.id, self.error)
    }
}

/// Decode one frame into a request or notification.
pub fn decode_message(frame: &[u8]) -> Result<Incoming, DecodeError> {
    let value: J = serde_json::from_slice(frame)
        .map_err(|e| DecodeError::new(None, RpcError::parse_error(e)))?;

    let obj = match value {
        J::Object(obj) => obj,
        J::Array(_) => {
            return Err(DecodeError::new(
                None,
                RpcError::invalid_request("batch requests are not supported"),
            ))
        }
        _ => {
            return Err(DecodeError::new(
                None,
                RpcError::invalid_request("message must be a JSON object"),
            ))
        }
    };

    let id = match obj.get("id") {
        None => None,
        Some(raw) => match serde_json::from_value::<RequestId>(raw.clone()) {
            Ok(id) => Some(id),
            Err(_) => {
                return Err(DecodeError::new(
                    None,
                    RpcError::invalid_request("id must be a string or an integer"),
                ))
            }
        },
    };

    if obj.get("jsonrpc").and_then(J::as_str) != Some(JSONRPC_VERSION) {
        return Err(DecodeError::new(id, RpcError::invalid_request("jsonrpc must be \"2.0\"")));
    }
    let method = match obj.get("method").and_then(J::as_str) {
        Some(m) if !m.is_empty() => m.to_owned(),
        _ => return Err(DecodeError::new(id, RpcError::invalid_request("method must be a non-empty string"))),
    };
    let params = match obj.get("params") {
        None | Some(J::Null) => None,
        Some(p @ (J::Object(_) | J::Array(_))) => Some(p.clone()),
        Some(_) => {
            return Err(DecodeError::new(id, RpcError::invalid_request("params must be an object or an array")))
        }
    };

    let jsonrpc = JSONRPC_VERSION.to_owned();
    Ok(match id {
        Some(id) => Incoming::Request(RpcRequest { jsonrpc, id, method, params }),
        None => Incoming::Notification(RpcNotification { jsonrpc, method, params }),
    })
}

// --- initialize ---

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: J,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: J,
    pub server_info: ServerInfo,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self { name: SERVER_NAME.to_string(), version: env!("CARGO_PKG_VERSION").to_string() }
    }
}

/// Echo the client's revision if we speak it, otherwise offer our newest.
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|r| SUPPORTED_PROTOCOL_VERSIONS.iter().copied().find(|v| *v == r))
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
}

// --- tools/call ---

#[derive(Deserialize, Debug, Clone)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<J>,
}
