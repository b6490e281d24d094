use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::BodyExt; // for .collect
use hyper::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt; // for .oneshot

use vex_mcp_server::core::content::ToolResult;
use vex_mcp_server::core::tool::{CallContext, Tool, ToolError, ToolSpec};
use vex_mcp_server::domain::openvex::NativeBackend;
use vex_mcp_server::infra::http_app::build_app;
use vex_mcp_server::infra::mcp::{McpServer, ServerState};
use vex_mcp_server::infra::runtime::http_transport::HttpTransport;
use vex_mcp_server::tools::vex_tools;

fn post(body: Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn initialize_list_and_call_over_http() {
    let (transport, front) = HttpTransport::new();
    let mut server = McpServer::new(Arc::new(transport));
    for tool in vex_tools(Arc::new(NativeBackend::new("Unknown Author"))) {
        server.register_tool(tool).unwrap();
    }
    let stop = server.stop_handle();
    let running = tokio::spawn(async move {
        let res = server.start().await;
        (server.state(), res)
    });
    let app = build_app(front);

    let health = app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let init = app
        .clone()
        .oneshot(post(json!({
            "jsonrpc":"2.0","id":1,"method":"initialize",
            "params":{"protocolVersion":"2025-03-26","capabilities":{},"clientInfo":{"name":"test","version":"0.1"}}
        })))
        .await
        .unwrap();
    assert_eq!(init.status(), StatusCode::OK);
    let v = body_json(init).await;
    assert_eq!(v["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(v["result"]["serverInfo"]["name"], "vex-mcp-server");

    let initialized = app
        .clone()
        .oneshot(post(json!({"jsonrpc":"2.0","method":"notifications/initialized"})))
        .await
        .unwrap();
    assert_eq!(initialized.status(), StatusCode::ACCEPTED);

    let list = app.clone().oneshot(post(json!({"jsonrpc":"2.0","id":2,"method":"tools/list"}))).await.unwrap();
    let v = body_json(list).await;
    let names: Vec<&str> = v["result"]["tools"].as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["create_vex_statement", "merge_vex_documents", "validate_vex_document"]);

    let call = app
        .clone()
        .oneshot(post(json!({
            "jsonrpc":"2.0","id":3,"method":"tools/call",
            "params":{"name":"create_vex_statement","arguments":{
                "vulnerability":"CVE-2024-0001",
                "products":["pkg:oci/app@sha256:abc"],
                "status":"not_affected",
                "justification":"component_not_present"
            }}
        })))
        .await
        .unwrap();
    assert_eq!(call.status(), StatusCode::OK);
    let v = body_json(call).await;
    assert_eq!(v["id"], 3);
    assert_eq!(v["result"]["isError"], false);
    let doc: Value = serde_json::from_str(v["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(doc["@context"], "https://openvex.dev/ns/v0.2.0");
    assert_eq!(doc["statements"][0]["justification"], "component_not_present");

    let rejected = app
        .clone()
        .oneshot(post(json!({
            "jsonrpc":"2.0","id":4,"method":"tools/call",
            "params":{"name":"create_vex_statement","arguments":{
                "vulnerability":"CVE-2024-0001","products":["p"],"status":"affected"
            }}
        })))
        .await
        .unwrap();
    let v = body_json(rejected).await;
    assert_eq!(v["result"]["isError"], true);

    let invalid = app
        .clone()
        .oneshot(post(json!({
            "jsonrpc":"2.0","id":5,"method":"tools/call",
            "params":{"name":"merge_vex_documents","arguments":{"documents":[]}}
        })))
        .await
        .unwrap();
    let v = body_json(invalid).await;
    assert_eq!(v["error"]["code"], -32602);
    assert_eq!(v["error"]["data"]["path"], "arguments.documents");

    stop.stop();
    let (state, res) = running.await.unwrap();
    assert!(res.is_ok());
    assert_eq!(state, ServerState::Stopped);

    let after = app.oneshot(post(json!({"jsonrpc":"2.0","id":6,"method":"ping"}))).await.unwrap();
    assert_eq!(after.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn malformed_bodies_are_rejected_at_the_front() {
    let (_transport, front) = HttpTransport::new();
    let app = build_app(front);

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .body(axum::body::Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let v = body_json(res).await;
    assert_eq!(v["error"]["code"], -32700);
    assert_eq!(v["id"], Value::Null);

    let res = app.oneshot(post(json!({"jsonrpc":"1.0","id":8,"method":"ping"}))).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let v = body_json(res).await;
    assert_eq!(v["error"]["code"], -32600);
    assert_eq!(v["id"], 8);
}

struct SlowEcho;

impl ToolSpec for SlowEcho {
    fn name(&self) -> &str {
        "slow_echo"
    }

    fn description(&self) -> &str {
        "echo msg after a pause"
    }

    fn input_schema(&self) -> Value {
        json!({"type":"object","properties":{"msg":{"type":"string"}},"required":["msg"]})
    }
}

#[async_trait]
impl Tool for SlowEcho {
    async fn execute(&self, _: CallContext, args: Value) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(ToolResult::text(args["msg"].as_str().unwrap_or_default()))
    }
}

#[tokio::test]
async fn independent_clients_may_reuse_a_request_id() {
    let (transport, front) = HttpTransport::new();
    let mut server = McpServer::new(Arc::new(transport));
    server.register_tool(Arc::new(SlowEcho)).unwrap();
    let stop = server.stop_handle();
    let running = tokio::spawn(async move { server.start().await });
    let app = build_app(front);

    let slow = tokio::spawn(app.clone().oneshot(post(json!({
        "jsonrpc":"2.0","id":1,"method":"tools/call",
        "params":{"name":"slow_echo","arguments":{"msg":"from a"}}
    }))));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let ping = app.oneshot(post(json!({"jsonrpc":"2.0","id":1,"method":"ping"}))).await.unwrap();

    // The ping overtakes the slow call that holds the same id.
    assert_eq!(ping.status(), StatusCode::OK);
    let v = body_json(ping).await;
    assert_eq!(v["id"], 1);
    assert_eq!(v["result"], json!({}));

    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow.status(), StatusCode::OK);
    let v = body_json(slow).await;
    assert_eq!(v["id"], 1);
    assert_eq!(v["result"]["content"][0]["text"], "from a");

    stop.stop();
    assert!(running.await.unwrap().is_ok());
}
