use std::sync::Arc;

use crate::clients::vexctl::VexctlBackend;
use crate::domain::openvex::NativeBackend;
use crate::domain::VexBackend;
use crate::infra::config::{BackendKind, Config, Mode};
use crate::infra::mcp::McpServer;
use crate::infra::runtime::http_transport::HttpTransport;
use crate::infra::runtime::mcp_transport::{StdioTransport, Transport};

pub fn make_backend(cfg: &Config) -> Arc<dyn VexBackend> {
    match cfg.backend {
        BackendKind::Native => Arc::new(NativeBackend::new(cfg.author.clone())),
        BackendKind::Vexctl => Arc::new(VexctlBackend::new(cfg.vexctl_path.clone(), cfg.author.clone())),
    }
}

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    cfg.validate()?;
    tracing::info!(
        mode = ?cfg.mode,
        backend = ?cfg.backend,
        call_timeout_ms = cfg.call_timeout.as_millis() as u64,
        "BOOT vex-mcp-server"
    );
    let backend = make_backend(&cfg);

    match cfg.mode {
        // Stdio mode: MCP over stdin/stdout ONLY (no HTTP).
        Mode::Stdio => serve(Arc::new(StdioTransport::stdio()), &cfg, backend).await,
        Mode::Http => {
            let (transport, front) = HttpTransport::new();
            let listener = tokio::net::TcpListener::bind(cfg.socket_addr()).await?;
            tracing::info!(addr = %listener.local_addr()?, "HTTP listening");

            let app = crate::infra::http_app::build_app(front.clone());
            let http = tokio::spawn(async move {
                axum::serve(listener, app).with_graceful_shutdown(front.closed()).await
            });
            let served = serve(Arc::new(transport), &cfg, backend).await;
            http.await??;
            served
        }
    }
}

/// Register the VEX tools on a dispatcher over `transport` and run it until
/// the stream ends or ctrl-c is received.
pub async fn serve(transport: Arc<dyn Transport>, cfg: &Config, backend: Arc<dyn VexBackend>) -> anyhow::Result<()> {
    let mut server = McpServer::with_config(transport, cfg.server_config());
    for tool in crate::tools::vex_tools(backend) {
        server.register_tool(tool)?;
    }

    let stop = server.stop_handle();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received; stopping");
            stop.stop();
        }
    });
    let res = server.start().await;
    signal.abort();
    Ok(res?)
}
