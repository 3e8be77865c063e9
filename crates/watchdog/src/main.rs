//! Cosmos Watchdog - scales idle non-production Cosmos DB throughput down
//!
//! Runs passes on a timer and on demand over HTTP, and serves health and
//! Prometheus metrics for the hosting platform.

use anyhow::{Context, Result};
use cosmos_watchdog::{api, config::WatchdogConfig, scheduler::PassScheduler};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use watchdog_lib::{
    health::{components, HealthRegistry},
    observability::{StructuredLogger, WatchdogMetrics},
    orchestrator::Watchdog,
    providers::{auth::MANAGEMENT_RESOURCE, ArmClient, DocumentDbConnector, TokenSource},
};

const WATCHDOG_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cosmos-watchdog");

    let config = WatchdogConfig::load()?;
    info!(
        subscription_id = %config.subscription_id,
        resource_group = ?config.resource_group,
        dry_run = config.dry_run,
        "Watchdog configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::PROVIDERS).await;
    health_registry.register(components::LAST_PASS).await;

    // Register metrics before the first scrape
    let _metrics = WatchdogMetrics::new();

    let tokens = match &config.access_token {
        Some(token) => TokenSource::fixed(token.clone()),
        None => TokenSource::from_environment(MANAGEMENT_RESOURCE)
            .context("no access token configured and no managed identity available")?,
    };
    let arm = Arc::new(
        ArmClient::new(&config.management_endpoint, tokens).context("invalid management endpoint")?,
    );
    let connector = Arc::new(DocumentDbConnector::new()?);
    let watchdog = Watchdog::new(arm.clone(), connector, arm);

    let logger = StructuredLogger::new(&config.subscription_id);
    logger.log_service_started(WATCHDOG_VERSION, config.schedule_interval_secs);

    let app_state = Arc::new(api::AppState::new(
        watchdog,
        config.pass_options(),
        health_registry.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = PassScheduler::new(app_state.clone(), config.schedule_interval())
        .run_on_startup(config.run_on_startup);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    logger.log_service_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    scheduler_handle.await?;
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
