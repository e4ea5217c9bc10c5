use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use chat_relay::config::{FileConfig, RelayConfig, load_config};
use chat_relay::{AppState, build_router, store};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Real-time chat relay with optional message persistence")]
struct Cli {
    /// Path to the TOML config file (missing file = defaults)
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the web server (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(debug: bool, json: bool) {
    let default_directive = if debug {
        "chat_relay=debug,relay=debug,tower_http=debug,info"
    } else {
        "chat_relay=info,relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.json_logs);

    info!("Starting chat relay");

    let mut file_config: FileConfig = load_config(&cli.config)
        .extract()
        .context("Invalid configuration")?;
    if let Some(host) = cli.host {
        file_config.server.host = host;
    }
    if let Some(port) = cli.port {
        file_config.server.port = port;
    }
    let config = RelayConfig::from_file(&file_config);

    if config.cors.is_open() {
        warn!("CORS allows any origin; set [cors] allowed_origins to restrict");
    } else {
        info!(origins = ?config.cors.allowed_origins, "CORS restricted");
    }

    let store = store::connect(&config.store)
        .await
        .context("Failed to open message store")?;

    let addr = config
        .server
        .bind_addr()
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid bind address {}", config.server.bind_addr()))?;
    let static_dir = config.server.static_dir.clone();

    let state = AppState::new(config, store);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Chat relay listening on http://{}", actual_addr);
    info!("Static client: {}", static_dir.display());
    info!("Endpoints:");
    info!("  GET /ws            - WebSocket chat");
    info!("  GET /past-message  - Recent message history");
    info!("  GET /health        - Liveness probe");
    info!("  GET /metrics       - Relay counters");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    info!("Shutdown complete");
    server_result
}
