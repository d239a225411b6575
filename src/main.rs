//! Resilience gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │                  RESILIENCE GATEWAY                  │
//!                        │                                                      │
//!   Client Request       │  ┌────────────┐   ┌──────────────┐                   │
//!   ─────────────────────┼─▶│ rate limit │──▶│ http router  │                   │
//!                        │  └────────────┘   └──────┬───────┘                   │
//!                        │            ┌─────────────┼──────────────┐            │
//!                        │            ▼             ▼              ▼            │
//!                        │     ┌────────────┐ ┌───────────┐ ┌────────────┐      │
//!                        │     │   orders   │ │   proxy   │ │   health   │      │
//!                        │     │   (saga)   │ │           │ │   probes   │      │
//!                        │     └─────┬──────┘ └─────┬─────┘ └─────┬──────┘      │
//!                        │           └──────┬───────┘             │             │
//!                        │                  ▼                     │             │
//!                        │        ┌───────────────────┐           │             │
//!                        │        │ pipeline (target) │           │             │
//!                        │        │ retry → breaker → │           │             │
//!                        │        │     timeout       │           │             │
//!                        │        └─────────┬─────────┘           │             │
//!                        │                  ▼                     ▼             │
//!                        │           ┌─────────────────────────────────┐        │
//!                        │           │ transport (HTTP or in-memory)   │────────┼──▶ payment
//!                        │           └─────────────────────────────────┘        │    inventory
//!                        │                                                      │    shipping
//!                        └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use resilience_gateway::config::watcher::ConfigWatcher;
use resilience_gateway::config::{load_config, GatewayConfig};
use resilience_gateway::lifecycle::{shutdown_signal, Shutdown};
use resilience_gateway::observability::{logging, metrics};
use resilience_gateway::HttpServer;

#[derive(Parser)]
#[command(name = "resilience-gateway", version, about = "Resilient API gateway for the order services")]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => resilience_gateway::config::loader::parse_config("")?,
    };
    logging::init_logging(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "resilience-gateway starting");
    log_config(&config);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher handle must outlive the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config)?;
    let server_task = tokio::spawn(server.run(listener, config_updates, shutdown.subscribe()));

    shutdown_signal().await;
    shutdown.trigger();
    server_task.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn log_config(config: &GatewayConfig) {
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        rate_limit_enabled = config.rate_limit.enabled,
        rate_limit_max = config.rate_limit.max_requests,
        collaborators = ?config.collaborators.mode,
        "Configuration loaded"
    );
    for (name, service) in config.services.iter() {
        tracing::info!(
            target_service = %name,
            base_url = %service.base_url,
            route_prefix = %service.route_prefix,
            timeout_ms = service.timeout_ms,
            "Service pipeline configured"
        );
    }
}
