use std::time::Duration;

pub fn init() {
    // stdout carries protocol frames in stdio mode, so logs always go to stderr.
    // Default to info level; allow override via RUST_LOG (e.g., "debug").
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Log a metrics-like line alongside whatever recorder is installed.
pub fn log_metric(tool: &str, metric: &str, value: f64) {
    tracing::info!(tool = tool, metric = metric, value = value, "metric");
}

/// Count and time one `tools/call`. `outcome` is one of `ok`, `tool_error`,
/// `invalid_params`, `cancelled`, `failed` or `timeout`.
pub fn record_tool_call(tool: &str, outcome: &'static str, elapsed: Duration) {
    let ms = elapsed.as_secs_f64() * 1_000.0;
    metrics::counter!("mcp_tool_calls_total", "tool" => tool.to_string(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!("mcp_tool_call_duration_ms", "tool" => tool.to_string()).record(ms);
    if outcome != "ok" {
        log_metric(tool, outcome, ms);
    }
}
