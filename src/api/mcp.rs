use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::core::mcp::{decode_message, Incoming};
use crate::infra::http::json as http_json;
use crate::infra::runtime::http_transport::{FrontError, HttpFront};

/// `POST /mcp`: one JSON-RPC message per body.
///
/// Requests wait for their dispatcher response; notifications are accepted
/// with `202` and no body. The dispatcher decides everything past framing.
pub async fn http(State(front): State<HttpFront>, body: Bytes) -> Response {
    let message = match decode_message(&body) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting undecodable HTTP body");
            return http_json::decode_error(e);
        }
    };
    tracing::debug!(method = %message.method(), id = ?message.id(), "HTTP handler invoked");

    let request = match message {
        Incoming::Request(r) => r,
        notification @ Incoming::Notification(_) => {
            return match front.submit(notification).await {
                Ok(()) => StatusCode::ACCEPTED.into_response(),
                Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            };
        }
    };

    let id = request.id.clone();
    match front.call(request).await {
        Ok(response) => http_json::ok(response),
        Err(FrontError::Closed) => http_json::unavailable(Some(id)),
    }
}
