//! cacheproxy binary.
//!
//! Usage: `cacheproxy [port]`. See [`cacheproxy::config`] for the
//! environment variables and config file it reads.

use std::process::ExitCode;
use std::sync::Arc;

use cacheproxy::{CacheStore, Config, Proxy, Server};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Defaults to "info"; override with RUST_LOG.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cacheproxy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::load(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(
        port = config.port,
        max_cache_size = config.max_cache_size,
        max_object_size = config.max_object_size,
        "configuration loaded"
    );

    let cache = Arc::new(CacheStore::with_limits(config.cache_limits()));
    let proxy = Arc::new(Proxy::new(Arc::clone(&cache), &config));

    let server = match Server::bind(config.bind_addr()).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run_until(proxy, shutdown_signal()).await {
        error!(error = %e, "listener failed");
        return ExitCode::FAILURE;
    }

    let stats = cache.stats();
    match serde_json::to_string(&stats) {
        Ok(json) => info!(stats = %json, hit_rate = stats.hit_rate(), "shutdown complete"),
        Err(e) => error!(error = %e, "could not serialize cache stats"),
    }
    ExitCode::SUCCESS
}

/// Waits for Ctrl+C or SIGTERM.
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
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
