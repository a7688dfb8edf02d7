//! Filter gateway
//!
//! An HTTP API gateway built with Tokio, Axum and Hyper.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────────────┐
//!                     │                        FILTER GATEWAY                         │
//!                     │                                                               │
//!   Client Request    │  ┌──────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//!   ──────────────────┼─▶│   http   │───▶│   routing    │───▶│    filter chain     │  │
//!                     │  │  server  │    │ table+router │    │ pre ─▶ ... ─▶ pre   │  │
//!                     │  └──────────┘    └──────────────┘    └──────────┬──────────┘  │
//!                     │                                                 │             │
//!                     │                                                 ▼             │
//!                     │                                      ┌─────────────────────┐  │
//!                     │                                      │ upstream dispatcher │  │
//!                     │                                      │  + connection pool  │──┼──▶ Upstream
//!                     │                                      └──────────┬──────────┘  │
//!                     │                                                 │             │
//!   Client Response   │  ┌──────────┐                        ┌──────────▼──────────┐  │
//!   ◀─────────────────┼──│ response │◀───────────────────────│ post ◀─ ... ◀─ post │  │
//!                     │  └──────────┘                        └─────────────────────┘  │
//!                     │                                                               │
//!                     │  ┌─────────────────────────────────────────────────────────┐  │
//!                     │  │ config + reload │ observability │ resilience │ admin API │  │
//!                     │  └─────────────────────────────────────────────────────────┘  │
//!                     └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use filter_gateway::config::watcher::ConfigWatcher;
use filter_gateway::config::{load_config, GatewayConfig};
use filter_gateway::http::{spawn_reload_loop, HttpServer};
use filter_gateway::lifecycle::{wait_for_signal, Shutdown};
use filter_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "filter-gateway", version, about = "HTTP API gateway with ordered filter chains")]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Watch the configuration file and apply route changes live.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "filter-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let shutdown = Shutdown::new();

    let mut server = HttpServer::new(config)?;

    // The watcher handle must outlive the server.
    let _watcher = match &args.config {
        Some(path) if args.watch => {
            server = server.with_config_path(path.clone());
            let (watcher, updates) = ConfigWatcher::new(path);
            spawn_reload_loop(server.state().clone(), updates, &shutdown);
            Some(watcher.run()?)
        }
        Some(path) => {
            server = server.with_config_path(path.clone());
            None
        }
        None => None,
    };

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.trigger();
    });

    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
