use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::core::error::RpcError;
use crate::core::mcp::{err as rpc_err, DecodeError, RequestId, RpcResponse};

/// A dispatcher response delivered as the body of its own exchange.
pub fn ok(response: RpcResponse) -> Response {
    (StatusCode::OK, Json(response)).into_response()
}

/// An error envelope produced by the HTTP front itself.
pub fn error(status: StatusCode, id: Option<RequestId>, error: RpcError) -> Response {
    (status, Json(rpc_err(id, error))).into_response()
}

pub fn decode_error(e: DecodeError) -> Response {
    error(StatusCode::BAD_REQUEST, e.id, e.error)
}

pub fn unavailable(id: Option<RequestId>) -> Response {
    error(StatusCode::SERVICE_UNAVAILABLE, id, RpcError::internal("server is shutting down"))
}
