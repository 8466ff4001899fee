use anyhow::{Context, Result};
use clap::Parser;
use codealive_mcp::client::CodeAliveClient;
use codealive_mcp::config::{load_config, Config, FileLayer};
use codealive_mcp::logging::init_logging;
use codealive_mcp::server::run_stdio_server;
use codealive_mcp::tools::ToolContext;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "codealive-mcp")]
#[command(version)]
#[command(about = "MCP stdio server for CodeAlive code search and codebase chat")]
struct Cli {
    /// CodeAlive API key (overrides CODEALIVE_API_KEY)
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,

    /// CodeAlive base URL, for self-hosted deployments (overrides CODEALIVE_BASE_URL)
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// JSON config file. Defaults to ~/.codealive/config.json when it exists.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log every backend request and response. Also disables TLS verification.
    #[arg(long)]
    debug: bool,

    /// Skip TLS certificate verification (self-signed deployments)
    #[arg(long)]
    ignore_ssl: bool,
}

impl Cli {
    fn apply(&self, cfg: &mut Config) {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            cfg.api_key = Some(key.clone());
        }
        if let Some(url) = self.base_url.as_ref().filter(|u| !u.is_empty()) {
            cfg.base_url = url.clone();
        }
        if self.debug {
            cfg.debug = true;
            cfg.verify_ssl = false;
        }
        if self.ignore_ssl {
            cfg.verify_ssl = false;
        }
    }
}

fn print_banner(cfg: &Config) {
    eprintln!("CodeAlive MCP server v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("  API key:  {}", cfg.masked_api_key());
    eprintln!("  Base URL: {}", cfg.base_url);
    eprintln!(
        "  SSL verification: {}",
        if cfg.verify_ssl { "enabled" } else { "disabled" }
    );
    if cfg.debug {
        eprintln!("  Debug mode: enabled");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    let (mut cfg, file_layer) = load_config(cli.config.as_deref());
    cfg.apply_process_env();
    cli.apply(&mut cfg);

    init_logging(cfg.debug);
    match &file_layer {
        FileLayer::Loaded(path) => info!(path = %path.display(), "loaded config file"),
        FileLayer::Invalid { path, error } => {
            warn!(path = %path.display(), error = %error, "ignoring invalid config file; using defaults")
        }
        FileLayer::Missing => {}
    }

    print_banner(&cfg);

    let client = CodeAliveClient::new(&cfg).context("Failed to start CodeAlive MCP server")?;
    let tools = ToolContext {
        api: Arc::new(client),
        retry: cfg.retry_policy(),
    };
    run_stdio_server(tools).await
}
