use axum::{
    routing::{get, post},
    Router,
};

use crate::infra::runtime::http_transport::HttpFront;

/// `/healthz` plus the request-per-POST MCP endpoint at `/mcp`.
pub fn build_app(front: HttpFront) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/mcp", post(crate::api::mcp::http))
        .with_state(front)
}
