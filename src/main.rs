//! CORS-enabling reverse proxy.
//!
//! Proxies http(s) URLs given in the request path and adds the CORS headers
//! that let browser scripts from any origin read the response.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌────────────────────────────────────────────────┐
//!                   │                  CORS PROXY                    │
//!                   │                                                │
//!   Client Request  │  ┌────────┐   ┌────────┐   ┌──────────────┐   │
//!   ────────────────┼─▶│  http  │──▶│ proxy  │──▶│ proxy::policy│   │
//!                   │  │ server │   │ target │   │  gate + hook │   │
//!                   │  └────────┘   └────────┘   └──────┬───────┘   │
//!                   │                                   │           │
//!                   │                                   ▼           │
//!   Client Response │  ┌────────┐   ┌────────┐   ┌──────────────┐   │
//!   ◀───────────────┼──│  CORS  │◀──│ chase  │◀──│   outbound   │◀──┼── Upstream
//!                   │  │ stamp  │   │        │   │    client    │   │
//!                   │  └────────┘   └────────┘   └──────────────┘   │
//!                   │                                                │
//!                   │  config · security::rate_limit · observability │
//!                   │  lifecycle (startup / graceful shutdown)       │
//!                   └────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cors_proxy::config::{load_config, ProxyConfig};
use cors_proxy::lifecycle::Shutdown;
use cors_proxy::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "cors-proxy", about = "CORS-enabling reverse proxy", version)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cors_proxy={}", config.observability.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        bind_address = %config.listener.bind_address,
        xfwd = config.upstream.xfwd,
        rate_limited = config.rate_limit.enabled(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        // Validated at load time; defaults always parse.
        let addr = config.observability.metrics_address.parse()?;
        cors_proxy::observability::metrics::init_metrics(addr)?;
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let server = HttpServer::new(config);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
