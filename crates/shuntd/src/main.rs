//! shuntd — the shunt connection router daemon.
//!
//! Single binary that loads the routing configuration, starts every
//! configured route, and runs until asked to stop:
//! - TCP and unix-socket listeners per `[routing.NAME]` section
//! - Classic and X protocol handshake policing
//! - Static destinations with quarantine, or metadata-cache routing
//!
//! # Usage
//!
//! ```text
//! shuntd --config /etc/shunt/shunt.toml
//! ```
//!
//! Exits 0 on a clean shutdown, 1 on a configuration error or an
//! unrecoverable runtime error.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use shunt_core::RouterConfig;
use shunt_core::config::Destinations;
use shunt_proxy::RouteRegistry;

#[derive(Parser)]
#[command(name = "shuntd", about = "MySQL connection router")]
struct Cli {
    /// Path to the router configuration file.
    #[arg(long, short)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shuntd=debug,shunt=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let routes = RouterConfig::from_file(&cli.config)
        .and_then(RouterConfig::validate)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // The metadata-cache collaborator is injected by the deployment
    // that runs one; this daemon only wires static routes.
    if let Some(route) = routes
        .iter()
        .find(|r| matches!(r.destinations, Destinations::MetadataCache { .. }))
    {
        anyhow::bail!(
            "routing section '{}' uses metadata-cache destinations but no metadata cache is configured",
            route.name
        );
    }

    info!(routes = routes.len(), "shuntd starting");
    let registry = RouteRegistry::start_all(routes, None)
        .await
        .context("starting routes")?;

    wait_for_shutdown().await;

    registry.stop_all().await;
    info!("clean shutdown");
    Ok(())
}

/// Block until ctrl-c or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received, shutting down");
    }
}
