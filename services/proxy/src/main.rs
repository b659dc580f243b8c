//! idlegate
//!
//! Starts a game server when the first player connects and stops it when
//! nobody has been connected for a while.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use idlegate_crafty::{CraftyClient, CraftyConfig};
use idlegate_proxy::actors::Supervisor;
use idlegate_proxy::config::{Config, ConfigSource, DEFAULT_CONFIG_PATH};
use idlegate_proxy::{launch_route, CraftyServer, TcpBackend};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Grace period for route controllers on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "idlegate", version, about)]
struct Args {
    /// Path to the TOML config file; created with defaults if missing.
    #[arg(long, env = "IDLEGATE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Load and validate the config, print the resolved routes and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, source) = Config::load(&args.config)?;

    // Initialize tracing (prefer RUST_LOG, fallback to config log_level)
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    if source == ConfigSource::CreatedDefault {
        info!(path = %args.config.display(), "Config file not found, created default");
    }

    let routes = config.resolve_routes().context("invalid configuration")?;

    if args.check {
        for route in &routes {
            println!(
                "{}: {} -> {} (server port {}, idle {:?}, autoshutdown {})",
                route.name,
                route.listen,
                route.backend,
                route.server_port,
                route.operator.idle_timeout,
                route.autoshutdown
            );
        }
        return Ok(());
    }

    info!("Starting idlegate");
    info!(
        config = %args.config.display(),
        api_url = %config.control_plane.api_url,
        route_count = routes.len(),
        "Configuration loaded"
    );

    let crafty = Arc::new(CraftyClient::new(CraftyConfig {
        api_url: config.control_plane.api_url.clone(),
        username: config.control_plane.username.clone(),
        password: config.control_plane.password.clone(),
        accept_invalid_certs: config.control_plane.accept_invalid_certs,
        request_timeout: config.request_timeout(),
    })?);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut supervisor = Supervisor::new();
    let mut handles = Vec::with_capacity(routes.len());

    for route in &routes {
        let backend = TcpBackend::new(
            route.backend.clone(),
            CraftyServer::new(Arc::clone(&crafty), route.server_port),
        );

        match launch_route(route, backend, &mut supervisor, shutdown_rx.clone()).await {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                error!(
                    route = %route.name,
                    listen = %route.listen,
                    error = %e,
                    "Failed to launch route"
                );
                supervisor.stop_all(SHUTDOWN_GRACE).await;
                return Err(e).with_context(|| format!("failed to bind {}", route.listen));
            }
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        handle.join().await;
    }
    supervisor.stop_all(SHUTDOWN_GRACE).await;

    info!("idlegate stopped");
    Ok(())
}
