use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use vex_mcp_server::core::content::ToolResult;
use vex_mcp_server::core::error::ServerError;
use vex_mcp_server::core::tool::{CallContext, Tool, ToolError, ToolSpec};
use vex_mcp_server::infra::mcp::{McpServer, ServerConfig, ServerState, StopHandle};
use vex_mcp_server::infra::runtime::mcp_transport::StdioTransport;
use vex_mcp_server::tools::registry::RegistryError;

enum Behaviour {
    Echo,
    Delay(Duration),
    ToolFailure,
    Fault,
    Panic,
    Hang,
    WaitForCancel(Arc<Notify>),
}

struct TestTool {
    name: &'static str,
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
}

impl TestTool {
    fn new(name: &'static str, behaviour: Behaviour) -> Self {
        Self { name, behaviour, calls: Arc::new(AtomicUsize::new(0)) }
    }
}

impl ToolSpec for TestTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "msg": { "type": "string" } },
            "required": ["msg"]
        })
    }
}

#[async_trait]
impl Tool for TestTool {
    async fn execute(&self, ctx: CallContext, args: Value) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let msg = args["msg"].as_str().unwrap_or_default().to_string();
        match &self.behaviour {
            Behaviour::Echo => Ok(ToolResult::text(msg)),
            Behaviour::Delay(d) => {
                tokio::time::sleep(*d).await;
                Ok(ToolResult::text(msg))
            }
            Behaviour::ToolFailure => Ok(ToolResult::error(format!("cannot process {msg}"))),
            Behaviour::Fault => Err(ToolError::Message("database password is hunter2".into())),
            Behaviour::Panic => panic!("tool blew up"),
            Behaviour::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behaviour::WaitForCancel(started) => {
                started.notify_one();
                ctx.cancelled().await;
                Err(ToolError::Cancelled)
            }
        }
    }
}

struct Client {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    stop: StopHandle,
    server: JoinHandle<(ServerState, Result<(), ServerError>)>,
}

impl Client {
    async fn send(&mut self, frame: Value) {
        self.input.write_all(frame.to_string().as_bytes()).await.unwrap();
        self.input.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.output.next_line())
            .await
            .expect("response within 5s")
            .unwrap()
            .expect("open stream");
        serde_json::from_str(&line).expect("each line is one JSON document")
    }

    async fn call(&mut self, id: i64, name: &str, arguments: Value) -> Value {
        self.send(json!({"jsonrpc":"2.0","id":id,"method":"tools/call","params":{"name":name,"arguments":arguments}}))
            .await;
        self.recv().await
    }

    async fn finish(self) -> (ServerState, Result<(), ServerError>) {
        drop(self.input);
        self.server.await.unwrap()
    }
}

fn start(tools: Vec<Arc<dyn Tool>>, config: ServerConfig) -> Client {
    let (input, server_in) = tokio::io::duplex(1 << 16);
    let (server_out, output) = tokio::io::duplex(1 << 16);
    let mut server = McpServer::with_config(Arc::new(StdioTransport::new(server_in, server_out)), config);
    for t in tools {
        server.register_tool(t).unwrap();
    }
    let stop = server.stop_handle();
    let handle = tokio::spawn(async move {
        let res = server.start().await;
        (server.state(), res)
    });
    Client { input, output: BufReader::new(output).lines(), stop, server: handle }
}

fn start_default(tools: Vec<Arc<dyn Tool>>) -> Client {
    start(tools, ServerConfig::default())
}

#[tokio::test]
async fn tools_list_is_in_registration_order() {
    let tools: Vec<Arc<dyn Tool>> = ["zulu", "alpha", "mike", "bravo"]
        .into_iter()
        .map(|n| Arc::new(TestTool::new(n, Behaviour::Echo)) as Arc<dyn Tool>)
        .collect();
    let mut client = start_default(tools);
    client.send(json!({"jsonrpc":"2.0","id":1,"method":"tools/list"})).await;
    let v = client.recv().await;
    let names: Vec<&str> = v["result"]["tools"].as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["zulu", "alpha", "mike", "bravo"]);
    assert_eq!(v["result"]["tools"][0]["description"], "test tool");
    let (_, res) = client.finish().await;
    assert!(res.is_ok());
}

#[test]
fn duplicate_registration_leaves_registry_unchanged() {
    let (_a, b) = tokio::io::duplex(64);
    let (c, _d) = tokio::io::duplex(64);
    let mut server = McpServer::new(Arc::new(StdioTransport::new(b, c)));
    server.register_tool(Arc::new(TestTool::new("echo", Behaviour::Echo))).unwrap();
    let before = server.tools();
    let err = server.register_tool(Arc::new(TestTool::new("echo", Behaviour::ToolFailure))).unwrap_err();
    assert_eq!(err, RegistryError::DuplicateName("echo".into()));
    assert_eq!(server.tools(), before);
}

#[tokio::test]
async fn scenario_a_echo_returns_its_message() {
    let mut client = start_default(vec![Arc::new(TestTool::new("echo", Behaviour::Echo))]);
    let v = client.call(1, "echo", json!({"msg": "hi"})).await;
    assert_eq!(v["id"], 1);
    assert_eq!(v["result"]["content"][0]["type"], "text");
    assert_eq!(v["result"]["content"][0]["text"], "hi");
    assert_eq!(v["result"]["isError"], false);
    let (_, res) = client.finish().await;
    assert!(res.is_ok());
}

#[tokio::test]
async fn scenario_b_unknown_tool_is_invalid_params() {
    let mut client = start_default(vec![]);
    client.send(json!({"jsonrpc":"2.0","id":"b","method":"tools/call","params":{"name":"missing"}})).await;
    let v = client.recv().await;
    assert_eq!(v["id"], "b");
    assert_eq!(v["error"]["code"], -32602);
    assert!(v.get("result").is_none());

    client.send(json!({"jsonrpc":"2.0","id":"c","method":"tools/call"})).await;
    assert_eq!(client.recv().await["error"]["code"], -32602);
    let (_, res) = client.finish().await;
    assert!(res.is_ok());
}

#[tokio::test]
async fn scenario_c_empty_registry_lists_no_tools() {
    let mut client = start_default(vec![]);
    client.send(json!({"jsonrpc":"2.0","id":3,"method":"tools/list"})).await;
    let v = client.recv().await;
    assert_eq!(v["result"]["tools"], json!([]));
    assert!(v.get("error").is_none());
    let (_, res) = client.finish().await;
    assert!(res.is_ok());
}

#[tokio::test]
async fn scenario_d_unknown_method_is_method_not_found() {
    let mut client = start_default(vec![]);
    client.send(json!({"jsonrpc":"2.0","id":4,"method":"unknown/op"})).await;
    let v = client.recv().await;
    assert_eq!(v["id"], 4);
    assert_eq!(v["error"]["code"], -32601);
    let (_, res) = client.finish().await;
    assert!(res.is_ok());
}

#[tokio::test]
async fn schema_violations_never_reach_the_tool() {
    let echo = TestTool::new("echo", Behaviour::Echo);
    let calls = Arc::clone(&echo.calls);
    let mut client = start_default(vec![Arc::new(echo)]);

    let missing = client.call(1, "echo", json!({})).await;
    assert_eq!(missing["error"]["code"], -32602);
    assert_eq!(missing["error"]["data"]["path"], "arguments");
    assert!(missing["error"]["message"].as_str().unwrap().contains("msg"));

    let wrong_type = client.call(2, "echo", json!({"msg": 5})).await;
    assert_eq!(wrong_type["error"]["code"], -32602);
    assert_eq!(wrong_type["error"]["data"]["path"], "arguments.msg");

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let (_, res) = client.finish().await;
    assert!(res.is_ok());
}

#[tokio::test]
async fn notifications_produce_no_output() {
    let mut client = start_default(vec![Arc::new(TestTool::new("echo", Behaviour::Echo))]);
    for method in ["notifications/initialized", "notifications/cancelled", "unknown/op", "tools/call"] {
        client.send(json!({"jsonrpc":"2.0","method":method,"params":{"requestId":1}})).await;
    }
    client.send(json!({"jsonrpc":"2.0","id":"after","method":"ping"})).await;
    let v = client.recv().await;
    assert_eq!(v["id"], "after");

    let (state, res) = client.finish().await;
    assert!(res.is_ok());
    assert_eq!(state, ServerState::Stopped);
}

#[tokio::test]
async fn slow_tool_does_not_block_fast_tool() {
    let mut client = start_default(vec![
        Arc::new(TestTool::new("slow", Behaviour::Delay(Duration::from_millis(300)))),
        Arc::new(TestTool::new("fast", Behaviour::Echo)),
    ]);
    client.send(json!({"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"slow","arguments":{"msg":"s"}}})).await;
    client.send(json!({"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"fast","arguments":{"msg":"f"}}})).await;

    let first = client.recv().await;
    let second = client.recv().await;
    assert_eq!(first["id"], 2);
    assert_eq!(first["result"]["content"][0]["text"], "f");
    assert_eq!(second["id"], 1);
    assert_eq!(second["result"]["content"][0]["text"], "s");
    let (_, res) = client.finish().await;
    assert!(res.is_ok());
}

#[tokio::test]
async fn concurrent_calls_are_never_interleaved() {
    let mut client = start_default(vec![Arc::new(TestTool::new("echo", Behaviour::Echo))]);
    let long = "x".repeat(20_000);
    for id in 0..20 {
        client
            .send(json!({"jsonrpc":"2.0","id":id,"method":"tools/call","params":{"name":"echo","arguments":{"msg":long}}}))
            .await;
    }
    let mut seen = Vec::new();
    for _ in 0..20 {
        let v = client.recv().await;
        assert_eq!(v["result"]["content"][0]["text"].as_str().map(str::len), Some(20_000));
        seen.push(v["id"].as_i64().unwrap());
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..20).collect::<Vec<_>>());
    let (_, res) = client.finish().await;
    assert!(res.is_ok());
}

#[tokio::test]
async fn is_error_results_pass_through_and_session_continues() {
    let mut client = start_default(vec![Arc::new(TestTool::new("bad", Behaviour::ToolFailure))]);
    for id in 1..=3 {
        let v = client.call(id, "bad", json!({"msg": "doc"})).await;
        assert_eq!(v["result"]["isError"], true);
        assert_eq!(v["result"]["content"][0]["text"], "cannot process doc");
        assert!(v.get("error").is_none());
    }
    client.send(json!({"jsonrpc":"2.0","id":4,"method":"ping"})).await;
    assert_eq!(client.recv().await["result"], json!({}));
    let (_, res) = client.finish().await;
    assert!(res.is_ok());
}

#[tokio::test]
async fn tool_faults_are_sanitized_internal_errors() {
    let mut client = start_default(vec![
        Arc::new(TestTool::new("fault", Behaviour::Fault)),
        Arc::new(TestTool::new("panic", Behaviour::Panic)),
    ]);
    let v = client.call(1, "fault", json!({"msg": "x"})).await;
    assert_eq!(v["error"]["code"], -32603);
    assert_eq!(v["error"]["message"], "tool execution failed");
    assert_eq!(v["error"]["data"]["tool"], "fault");
    assert!(!v.to_string().contains("hunter2"));

    let v = client.call(2, "panic", json!({"msg": "x"})).await;
    assert_eq!(v["error"]["code"], -32603);
    assert!(!v.to_string().contains("blew up"));

    client.send(json!({"jsonrpc":"2.0","id":3,"method":"ping"})).await;
    assert_eq!(client.recv().await["id"], 3);
    let (_, res) = client.finish().await;
    assert!(res.is_ok());
}

#[tokio::test]
async fn hanging_tool_is_bounded_by_call_timeout() {
    let config = ServerConfig { call_timeout: Duration::from_millis(100), ..ServerConfig::default() };
    let mut client = start(vec![Arc::new(TestTool::new("hang", Behaviour::Hang))], config);
    let v = client.call(1, "hang", json!({"msg": "x"})).await;
    assert_eq!(v["error"]["code"], -32603);
    assert_eq!(v["error"]["message"], "tool call timed out");
    assert_eq!(v["error"]["data"]["timeoutMs"], 100);
    let (_, res) = client.finish().await;
    assert!(res.is_ok());
}

#[tokio::test]
async fn stop_cancels_in_flight_calls_and_drains() {
    let started = Arc::new(Notify::new());
    let mut client = start_default(vec![Arc::new(TestTool::new(
        "wait",
        Behaviour::WaitForCancel(Arc::clone(&started)),
    ))]);
    client
        .send(json!({"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"name":"wait","arguments":{"msg":"x"}}}))
        .await;
    started.notified().await;
    client.stop.stop();

    let v = client.recv().await;
    assert_eq!(v["id"], 9);
    assert_eq!(v["error"]["code"], -32603);
    assert_eq!(v["error"]["message"], "tool call cancelled");

    let (state, res) = client.server.await.unwrap();
    assert!(res.is_ok());
    assert_eq!(state, ServerState::Stopped);
    assert!(client.output.next_line().await.unwrap().is_none());
}

#[tokio::test]
async fn registering_after_start_is_rejected() {
    let client = start_default(vec![]);
    let (state, res) = client.finish().await;
    assert!(res.is_ok());
    assert_eq!(state, ServerState::Stopped);

    let (_a, b) = tokio::io::duplex(64);
    let (c, _d) = tokio::io::duplex(64);
    let mut server = McpServer::new(Arc::new(StdioTransport::new(b, c)));
    server.stop();
    server.start().await.unwrap();
    let err = server.register_tool(Arc::new(TestTool::new("late", Behaviour::Echo))).unwrap_err();
    assert!(matches!(err, RegistryError::Frozen(_)));
    assert!(matches!(server.start().await, Err(ServerError::AlreadyStarted)));
}
