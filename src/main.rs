//! proxywatch - Docker socket proxy monitor
//!
//! Polls one or more read-only Docker socket proxies and keeps a stable,
//! grace-period aware set of container entities for each of them.

mod config;
mod fetch;
mod reconcile;
mod scheduler;
mod snapshot;
mod web;

use config::ServerConfig;
use scheduler::{LogListener, Scheduler};
use snapshot::NoDigestSource;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("proxywatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting proxywatch on port {}...", cfg.http_port);
    let hosts = cfg.instances()?;

    // Create scheduler
    let scheduler = Arc::new(Scheduler::new(Arc::new(LogListener), Arc::new(NoDigestSource)));
    scheduler.start(hosts).await?;

    // Start web server
    let server = Server::new(cfg, scheduler.clone());
    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping...");
        }
    }

    scheduler.stop().await;
    Ok(())
}
