use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    vex_mcp_server::infra::logging::init();
    vex_mcp_server::cli::run().await
}
