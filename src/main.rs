use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hls_proxy::{config::Config, web::WebServer};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "hls-proxy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "An HLS streaming reverse proxy with manifest rewriting and per-client throttling")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with the specified level unless RUST_LOG is set
    let log_filter = format!("hls_proxy={}", cli.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()),
        )
        .init();

    info!("Starting HLS Proxy v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from the specified file (missing file = defaults)
    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    // Override config with CLI arguments
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }

    if !config.policy.allowed_hosts.is_empty() {
        info!(
            hosts = config.policy.allowed_hosts.len(),
            "host allowlist active"
        );
    }

    let shutdown = CancellationToken::new();
    let server = WebServer::new(config, shutdown.clone())?;

    // Ctrl-C stops the listener and cancels the sweep tasks.
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
        }
    });

    server.serve().await
}
