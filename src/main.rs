use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratewarden::config::RatewardenConfig;
use ratewarden::http::HttpServer;
use ratewarden::ratelimit::{
    AdminFacade, CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore, RuleTable,
    RuleTableConfig,
};

/// Distributed sliding-window rate limiting middleware for HTTP APIs.
#[derive(Parser, Debug)]
#[command(name = "ratewarden", version, about)]
struct Args {
    /// Path to the service configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address, overriding the configuration file
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Redis URL for the shared counting backend, overriding the
    /// configuration file
    #[arg(long)]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    info!("Starting Ratewarden");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => RatewardenConfig::from_file(path)?,
        None => RatewardenConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(url) = args.redis_url {
        config.rate_limiting.redis_url = Some(url);
    }
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    let rules = Arc::new(match &config.rate_limiting.rules_path {
        Some(path) => RuleTable::build(RuleTableConfig::from_file(path)?)?,
        None => RuleTable::build(RuleTableConfig::default())?,
    });

    let key_prefix = config.rate_limiting.key_prefix.clone();
    let store: Arc<dyn CounterStore> = match &config.rate_limiting.redis_url {
        Some(url) => {
            info!(url = %url, "Using shared Redis counting backend");
            Arc::new(RedisCounterStore::connect(url, &key_prefix).await?)
        }
        None => {
            info!("No Redis configured, using in-process counters (single-instance mode)");
            Arc::new(MemoryCounterStore::new())
        }
    };

    let limiter = Arc::new(RateLimiter::new(
        Arc::clone(&store),
        Arc::clone(&rules),
        Duration::from_millis(config.rate_limiting.backend_timeout_ms),
        key_prefix.clone(),
    ));
    let facade = Arc::new(AdminFacade::new(store, rules, key_prefix));

    let server = HttpServer::new(
        config.server.listen_addr,
        limiter,
        facade,
        config.server.trust_proxy_headers,
    );

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Ratewarden stopped");
    Ok(())
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
