//! MCP dispatcher: owns the tool registry and a transport, runs the
//! read/dispatch/write loop and turns tool outcomes into wire responses.
//!
//! Reads are sequential. Every `tools/call` runs on its own task so a slow tool
//! never blocks reading or answering other requests; responses may therefore
//! leave out of order and clients correlate them by id. All writes pass through
//! one lock so concurrent completions never interleave on the wire.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value as J};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinSet};

use crate::core::error::{RpcError, ServerError};
use crate::core::mcp::{
    err, negotiate_protocol_version, ok, Incoming, InitializeParams, InitializeResult,
    RequestId, RpcNotification, RpcRequest, RpcResponse, ServerInfo, ToolCallParams,
};
use crate::core::schema;
use crate::core::tool::{CallContext, Tool, ToolDescriptor, ToolError};
use crate::infra::logging::record_tool_call;
use crate::infra::runtime::mcp_transport::{Transport, TransportError};
use crate::tools::registry::{RegistryError, ToolRegistry};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upper bound on a single `tools/call`, enforced by the dispatcher.
    pub call_timeout: Duration,
    pub server_info: ServerInfo,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { call_timeout: DEFAULT_CALL_TIMEOUT, server_info: ServerInfo::default() }
    }
}

/// Lifecycle: `Created -> Running -> Stopping -> Stopped`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl ServerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Requests orderly termination of a running server; usable while `start`
/// holds the server borrowed.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Protocol methods. Anything not listed here is `MethodNotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Initialize,
    Ping,
    ToolsList,
    ToolsCall,
}

impl Method {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "initialize" => Some(Self::Initialize),
            "ping" => Some(Self::Ping),
            "tools/list" => Some(Self::ToolsList),
            "tools/call" => Some(Self::ToolsCall),
            _ => None,
        }
    }
}

/// Lifecycle notifications we act on; everything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Initialized,
    Cancelled,
}

impl Hook {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "notifications/initialized" => Some(Self::Initialized),
            "notifications/cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ToolsListResult {
    tools: Vec<ToolDescriptor>,
}

pub struct McpServer {
    registry: Arc<ToolRegistry>,
    transport: Arc<dyn Transport>,
    config: ServerConfig,
    state: Arc<AtomicU8>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl McpServer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ServerConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: ServerConfig) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            registry: Arc::new(ToolRegistry::new()),
            transport,
            config,
            state: Arc::new(AtomicU8::new(ServerState::Created as u8)),
            shutdown: Arc::new(tx),
        }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::Release);
        tracing::debug!(?state, "dispatcher state");
    }

    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        if self.state() != ServerState::Created {
            return Err(RegistryError::Frozen(tool.name().to_string()));
        }
        match Arc::get_mut(&mut self.registry) {
            Some(registry) => {
                registry.register(tool)?;
                tracing::debug!(tools = registry.len(), "tool registered");
                Ok(())
            }
            None => Err(RegistryError::Frozen(tool.name().to_string())),
        }
    }

    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.registry.list()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { tx: Arc::clone(&self.shutdown) }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Serve until end-of-stream, a stop request, an unrecoverable frame or a
    /// failed write. In-flight calls are drained before the transport closes.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        if self.state() != ServerState::Created {
            return Err(ServerError::AlreadyStarted);
        }
        if let Some(registry) = Arc::get_mut(&mut self.registry) {
            registry.freeze();
        }
        self.set_state(ServerState::Running);
        tracing::info!(tools = self.registry.len(), "MCP dispatcher running");

        let dispatch = Dispatch {
            registry: Arc::clone(&self.registry),
            outbox: Arc::new(Outbox { transport: Arc::clone(&self.transport), write_lock: Mutex::new(()) }),
            shutdown: self.shutdown.subscribe(),
            call_timeout: self.config.call_timeout,
            server_info: self.config.server_info.clone(),
        };
        let mut stop_rx = self.shutdown.subscribe();
        let mut in_flight: JoinSet<Result<(), TransportError>> = JoinSet::new();

        let exit = serve(&dispatch, self.transport.as_ref(), &mut stop_rx, &mut in_flight).await;
        self.set_state(ServerState::Stopping);

        // Calls are only abandoned when responses can no longer be written.
        let (mut result, abandon) = match exit {
            Exit::EndOfStream => {
                tracing::info!(in_flight = in_flight.len(), "end of stream; draining");
                (Ok(()), false)
            }
            Exit::StopRequested => {
                tracing::info!(in_flight = in_flight.len(), "stop requested; cancelling in-flight calls");
                (Ok(()), false)
            }
            Exit::Failed(e @ ServerError::UnrecoverableFrame(_)) => {
                self.shutdown.send_replace(true);
                (Err(e), false)
            }
            Exit::Failed(e) => {
                self.shutdown.send_replace(true);
                (Err(e), true)
            }
        };

        if abandon {
            in_flight.shutdown().await;
        } else if let Err(e) = drain(&mut in_flight).await {
            tracing::error!(error = %e, "write failed while draining");
            self.shutdown.send_replace(true);
            in_flight.shutdown().await;
            if result.is_ok() {
                result = Err(e.into());
            }
        }

        if let Err(e) = self.transport.close().await {
            tracing::warn!(error = %e, "transport close failed");
        }
        self.set_state(ServerState::Stopped);
        tracing::info!("MCP dispatcher stopped");
        result
    }
}

enum Exit {
    EndOfStream,
    StopRequested,
    Failed(ServerError),
}

async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn serve(
    dispatch: &Dispatch,
    transport: &dyn Transport,
    stop_rx: &mut watch::Receiver<bool>,
    in_flight: &mut JoinSet<Result<(), TransportError>>,
) -> Exit {
    loop {
        tokio::select! {
            biased;
            _ = stop_requested(stop_rx) => return Exit::StopRequested,
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = settle(joined) {
                    tracing::error!(error = %e, "response write failed");
                    return Exit::Failed(e.into());
                }
            }
            inbound = transport.read() => match inbound {
                Ok(Some(message)) => {
                    if let Err(e) = dispatch.route(message, in_flight).await {
                        tracing::error!(error = %e, "response write failed");
                        return Exit::Failed(e.into());
                    }
                }
                Ok(None) => return Exit::EndOfStream,
                Err(TransportError::Decode(e)) => {
                    if e.id.is_none() {
                        tracing::error!(error = %e, "undecodable frame without id; closing stream");
                        return Exit::Failed(ServerError::UnrecoverableFrame(e.error.message));
                    }
                    tracing::warn!(id = ?e.id, error = %e, "rejecting malformed request");
                    if let Err(we) = dispatch.outbox.send(&e.into_response()).await {
                        return Exit::Failed(we.into());
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "transport read failed");
                    return Exit::Failed(e.into());
                }
            },
        }
    }
}

async fn drain(in_flight: &mut JoinSet<Result<(), TransportError>>) -> Result<(), TransportError> {
    while let Some(joined) = in_flight.join_next().await {
        settle(joined)?;
    }
    Ok(())
}

/// Only write failures are fatal; a crashed or aborted call task is logged.
fn settle(joined: Result<Result<(), TransportError>, JoinError>) -> Result<(), TransportError> {
    match joined {
        Ok(written) => written,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "call task crashed");
            Ok(())
        }
    }
}

struct Outbox {
    transport: Arc<dyn Transport>,
    write_lock: Mutex<()>,
}

impl Outbox {
    async fn send(&self, response: &RpcResponse) -> Result<(), TransportError> {
        let _guard = self.write_lock.lock().await;
        self.transport.write(response).await
    }
}

#[derive(Clone)]
struct Dispatch {
    registry: Arc<ToolRegistry>,
    outbox: Arc<Outbox>,
    shutdown: watch::Receiver<bool>,
    call_timeout: Duration,
    server_info: ServerInfo,
}

impl Dispatch {
    async fn route(
        &self,
        message: Incoming,
        in_flight: &mut JoinSet<Result<(), TransportError>>,
    ) -> Result<(), TransportError> {
        let request = match message {
            Incoming::Notification(n) => {
                self.on_notification(&n);
                return Ok(());
            }
            Incoming::Request(r) => r,
        };
        tracing::debug!(method = %request.method, id = %request.id, "request");

        match Method::parse(&request.method) {
            Some(Method::ToolsCall) => {
                let this = self.clone();
                in_flight.spawn(async move {
                    let response = this.call_tool(request.id, request.params).await;
                    this.outbox.send(&response).await
                });
                Ok(())
            }
            Some(method) => {
                let response = self.answer(method, request);
                self.outbox.send(&response).await
            }
            None => {
                tracing::warn!(method = %request.method, "unknown method");
                let response = err(Some(request.id), RpcError::method_not_found(&request.method));
                self.outbox.send(&response).await
            }
        }
    }

    fn on_notification(&self, notification: &RpcNotification) {
        match Hook::parse(&notification.method) {
            Some(Hook::Initialized) => tracing::info!("client initialized"),
            Some(Hook::Cancelled) => {
                let request_id = notification.params.as_ref().and_then(|p| p.get("requestId")).cloned();
                tracing::debug!(?request_id, "client cancelled a request; it will still be answered");
            }
            None => tracing::debug!(method = %notification.method, "ignoring notification"),
        }
    }

    fn answer(&self, method: Method, request: RpcRequest) -> RpcResponse {
        let id = request.id;
        let outcome = match method {
            Method::Initialize => self.initialize(request.params),
            Method::Ping => Ok(json!({})),
            Method::ToolsList => to_result(&ToolsListResult { tools: self.registry.list() }),
            Method::ToolsCall => Err(RpcError::internal("tools/call is dispatched asynchronously")),
        };
        match outcome {
            Ok(result) => ok(id, result),
            Err(e) => err(Some(id), e),
        }
    }

    fn initialize(&self, params: Option<J>) -> Result<J, RpcError> {
        let params: InitializeParams = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| RpcError::invalid_params(format!("invalid initialize params: {e}")))?,
            None => InitializeParams::default(),
        };
        let version = negotiate_protocol_version(params.protocol_version.as_deref());
        if let Some(client) = &params.client_info {
            tracing::info!(client = %client.name, client_version = ?client.version, protocol = version, "initialize");
        }
        to_result(&InitializeResult {
            protocol_version: version.to_string(),
            capabilities: json!({ "tools": { "listChanged": false } }),
            server_info: self.server_info.clone(),
        })
    }

    async fn call_tool(&self, id: RequestId, params: Option<J>) -> RpcResponse {
        match self.try_call_tool(params).await {
            Ok(result) => ok(id, result),
            Err(e) => err(Some(id), e),
        }
    }

    async fn try_call_tool(&self, params: Option<J>) -> Result<J, RpcError> {
        let params = params
            .ok_or_else(|| RpcError::invalid_params("missing params: expected {name, arguments}"))?;
        let ToolCallParams { name, arguments } = serde_json::from_value(params)
            .map_err(|e| RpcError::invalid_params(format!("invalid tools/call params: {e}")))?;
        let tool = self.registry.lookup(&name).ok_or_else(|| {
            RpcError::invalid_params(format!("unknown tool: {name}")).with_data(json!({ "tool": name }))
        })?;

        let arguments = arguments.unwrap_or_else(|| json!({}));
        if let Err(v) = schema::validate(&tool.input_schema(), &arguments) {
            tracing::debug!(tool = %name, violation = %v, "arguments rejected");
            record_tool_call(&name, "invalid_params", Duration::ZERO);
            return Err(RpcError::invalid_params(format!("invalid arguments: {v}"))
                .with_data(json!({ "tool": name, "path": v.path })));
        }

        let ctx = CallContext::new(self.shutdown.clone(), self.call_timeout);
        let started = Instant::now();
        let mut task = tokio::spawn(async move { tool.execute(ctx, arguments).await });

        match tokio::time::timeout(self.call_timeout, &mut task).await {
            Ok(Ok(Ok(result))) => {
                let outcome = if result.is_error { "tool_error" } else { "ok" };
                record_tool_call(&name, outcome, started.elapsed());
                to_result(&result)
            }
            Ok(Ok(Err(ToolError::Cancelled))) => {
                record_tool_call(&name, "cancelled", started.elapsed());
                tracing::warn!(tool = %name, "tool call cancelled");
                Err(RpcError::internal("tool call cancelled").with_data(json!({ "tool": name })))
            }
            Ok(Ok(Err(e))) => {
                record_tool_call(&name, "failed", started.elapsed());
                tracing::error!(tool = %name, error = ?e, "tool execution failed");
                Err(RpcError::internal("tool execution failed").with_data(json!({ "tool": name })))
            }
            Ok(Err(join)) => {
                record_tool_call(&name, "failed", started.elapsed());
                tracing::error!(tool = %name, error = %join, "tool task crashed");
                Err(RpcError::internal("tool execution failed").with_data(json!({ "tool": name })))
            }
            Err(_) => {
                task.abort();
                record_tool_call(&name, "timeout", started.elapsed());
                tracing::warn!(tool = %name, timeout_ms = self.call_timeout.as_millis() as u64, "tool call timed out");
                Err(RpcError::internal("tool call timed out").with_data(json!({
                    "tool": name,
                    "timeoutMs": self.call_timeout.as_millis() as u64,
                })))
            }
        }
    }
}

fn to_result<T: Serialize>(value: &T) -> Result<J, RpcError> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "failed to encode result");
        RpcError::internal("failed to encode result")
    })
}
