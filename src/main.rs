//! HTTP forwarding proxy (v1)
//!
//! Accepts `{context_path}/proxy?url=<target>` and relays the target's
//! response, built with Tokio, Axum and hyper.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────────────┐
//!                   │                   FORWARD PROXY                      │
//!   Caller request  │  ┌────────┐   ┌──────────┐   ┌────────────┐          │
//!   ────────────────┼─▶│  http  │──▶│ security │──▶│  forward   │          │
//!                   │  │ server │   │validator │   │ translator │          │
//!                   │  └────────┘   └──────────┘   └─────┬──────┘          │
//!                   │                                    ▼                 │
//!                   │                              ┌────────────┐  ┌─────┐ │
//!                   │                              │  executor  │─▶│pool │─┼──▶ Upstream
//!                   │                              └─────┬──────┘  └─────┘ │
//!                   │                                    ▼                 │
//!   Caller response │                              ┌────────────┐          │
//!   ◀───────────────┼──────────────────────────────│   relay    │◀─────────┼─── body
//!                   │                              └────────────┘          │
//!                   │  config · observability · resilience · lifecycle     │
//!                   └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use forward_proxy::config::loader::load_config;
use forward_proxy::config::watcher::ConfigWatcher;
use forward_proxy::config::ProxyConfig;
use forward_proxy::lifecycle::signals::spawn_signal_handler;
use forward_proxy::lifecycle::Shutdown;
use forward_proxy::observability::{logging, metrics};
use forward_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "forward-proxy")]
#[command(about = "HTTP forwarding proxy", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "forward-proxy starting");

    if rustls::crypto::aws_lc_rs::default_provider().install_default().is_err() {
        tracing::debug!("rustls crypto provider already installed");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        proxy_path = %config.listener.proxy_path(),
        max_connections_per_host = config.pool.max_connections_per_host,
        response_timeout_secs = config.upstream.response_timeout_secs,
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

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);

    // The watcher must stay alive for reloads to keep flowing.
    let (config_updates, _watcher) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (updates, Some(handle)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (updates, None)
                }
            }
        }
        None => (mpsc::unbounded_channel().1, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
