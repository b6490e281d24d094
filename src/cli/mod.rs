use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use crate::infra::config::{Config, Mode};
use crate::infra::http::headers::add_standard_headers;
use crate::infra::runtime::limits::{make_http_client, retry_async};

#[derive(Parser)]
#[command(name = "vex-mcp-server")]
#[command(about = "MCP server for OpenVEX documents")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the MCP server (default)
    Serve {
        /// Transport: stdio or http
        #[arg(long)]
        mode: Option<Mode>,
        /// HTTP port (http mode)
        #[arg(short, long)]
        port: Option<u16>,
        /// TOML config file, overrides VEX_CONFIG
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Health check a running HTTP server
    Health {
        /// Service URL to check
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,
        /// Extra attempts before giving up
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },
    /// Validate configuration
    Config {
        /// Validate config without starting service
        #[arg(long)]
        validate: bool,
        /// TOML config file, overrides VEX_CONFIG
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show service status and the tools it exposes
    Status {
        /// Service URL to check
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Self::Serve { mode: None, port: None, config: None }
    }
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    run_commands(cli.command.unwrap_or_default()).await
}

pub async fn run_commands(command: Commands) -> ExitCode {
    match command {
        Commands::Serve { mode, port, config } => {
            let cfg = match load_config(config).map(|mut cfg| {
                if let Some(m) = mode {
                    cfg.mode = m;
                }
                if let Some(p) = port {
                    cfg.port = p;
                }
                cfg
            }) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("❌ Configuration error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            match crate::infra::boot::run_server(cfg).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "server exited with error");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Health { url, retries } => {
            match retry_async(retries, |_| health_check(&url)).await {
                Ok(_) => {
                    println!("✅ Service is healthy");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("❌ Health check failed: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Config { validate, config } => match validate_config(config) {
            Ok(cfg) => {
                if validate {
                    println!("✅ Configuration is valid");
                } else {
                    print_config(&cfg);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Configuration validation failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Status { url } => match show_status(&url).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("❌ Status check failed: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn load_config(file: Option<PathBuf>) -> anyhow::Result<Config> {
    Ok(match file {
        Some(path) => Config::load(Some(path))?,
        None => Config::from_env()?,
    })
}

fn validate_config(file: Option<PathBuf>) -> anyhow::Result<Config> {
    let cfg = load_config(file)?;
    cfg.validate()?;
    Ok(cfg)
}

fn print_config(cfg: &Config) {
    println!("📋 Configuration:");
    println!("  Mode: {:?}", cfg.mode);
    println!("  Listen: {}", cfg.socket_addr());
    println!("  Call timeout: {} ms", cfg.call_timeout.as_millis());
    println!("  VEX backend: {:?}", cfg.backend);
    println!("  vexctl: {}", cfg.vexctl_path);
    println!("  Default author: {}", cfg.author);
}

async fn health_check(url: &str) -> anyhow::Result<()> {
    let client = make_http_client(Duration::from_millis(500))?;
    let (builder, rid) = add_standard_headers(client.get(format!("{}/healthz", url.trim_end_matches('/'))), None);
    let response = builder.send().await?;
    tracing::debug!(request_id = %rid, status = %response.status(), "health probe");

    if response.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("HTTP {}", response.status())
    }
}

/// Names of the tools a server reports through `tools/list`.
async fn list_tools(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<String>> {
    let (builder, _rid) = add_standard_headers(client.post(format!("{}/mcp", url.trim_end_matches('/'))), None);
    let response = builder
        .json(&serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
        .send()
        .await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    let body: serde_json::Value = response.json().await?;
    let tools = body["result"]["tools"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("response has no tools list"))?;
    Ok(tools.iter().filter_map(|t| t["name"].as_str().map(str::to_string)).collect())
}

async fn show_status(url: &str) -> anyhow::Result<()> {
    let client = make_http_client(Duration::from_secs(5))?;
    let health = client.get(format!("{}/healthz", url.trim_end_matches('/'))).send().await?;

    println!(
        "🏥 Health Status: {}",
        if health.status().is_success() {
            "✅ Healthy"
        } else {
            "❌ Unhealthy"
        }
    );

    match list_tools(&client, url).await {
        Ok(names) => {
            println!("🔧 Tools: ✅ {} available", names.len());
            for name in names {
                println!("  - {name}");
            }
        }
        Err(e) => println!("🔧 Tools: ❌ {e}"),
    }

    println!(
        "  Log Level: {}",
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())
    );
    Ok(())
}
