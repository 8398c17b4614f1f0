use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderName;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollbooth::api::{ActionService, HttpServer};
use tollbooth::config::TollboothConfig;
use tollbooth::ratelimit::{LimitRules, RateLimiter};
use tollbooth::store::MemoryStore;

/// Per-tenant API rate limiting service.
#[derive(Debug, Parser)]
#[command(name = "tollbooth", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "TOLLBOOTH_CONFIG")]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Starting Tollbooth Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TollboothConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        utc_offset_secs = config.windows.utc_offset_secs,
        "Configuration loaded"
    );

    let store = Arc::new(match config.rate_limiting.max_log_entries {
        Some(capacity) => MemoryStore::with_log_capacity(capacity),
        None => MemoryStore::new(),
    });
    let limiter = RateLimiter::new(store).with_utc_offset(config.windows.offset()?);

    if let Some(path) = &config.rate_limiting.rules_path {
        let rules = LimitRules::from_file(path).with_context(|| format!("loading rules from {}", path))?;
        rules.apply(&limiter).await?;
    }
    info!("Rate limiter initialized");

    let identity_header = HeaderName::from_bytes(config.server.identity_header.as_bytes())
        .context("invalid identity header")?;
    let service = Arc::new(ActionService::new(Arc::new(limiter)));
    let server = HttpServer::new(config.server.listen_addr, service, identity_header);

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Tollbooth Rate Limiting Service stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
