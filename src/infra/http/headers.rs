use reqwest::RequestBuilder;

/// Generate a simple request id suitable for logging/correlation.
pub fn generate_request_id() -> String {
    format!("vex-{}", uuid::Uuid::new_v4().simple())
}

pub fn user_agent() -> String {
    format!("{}/{}", crate::core::mcp::SERVER_NAME, env!("CARGO_PKG_VERSION"))
}

/// Add standard headers to an outgoing request. Returns the updated builder and the request id used.
pub fn add_standard_headers(builder: RequestBuilder, request_id: Option<String>) -> (RequestBuilder, String) {
    let rid = request_id.unwrap_or_else(generate_request_id);
    let b = builder
        .header("x-request-id", rid.as_str())
        .header(reqwest::header::USER_AGENT, user_agent());
    (b, rid)
}
