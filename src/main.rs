use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

use atlas_worker::engine::{EngineSettings, WorkerEngine};
use atlas_worker::handler::HandlerRegistry;
use atlas_worker::lifecycle::WorkerLifecycle;
use atlas_worker::{build_client, orders, utils, Config};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (file if present, then environment overrides)
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::resolve(&config_path)?;

    // Initialize logging
    utils::initialize_logging(&config)?;

    let root = info_span!(
        "service",
        name = %config.service.name,
        environment = %config.service.environment
    );

    run(config).instrument(root).await
}

async fn run(config: Config) -> Result<()> {
    info!(
        "🚀 Starting worker (driver: {:?}, topic: '{}', concurrency: {})",
        config.messaging.driver,
        config.messaging.topic,
        config.concurrency()
    );

    let client = build_client(&config).context("Failed to create log client")?;

    // Every domain module contributes its handlers here
    let registry = HandlerRegistry::builder()
        .extend(orders::registrations(&config))
        .build()?;

    let engine = Arc::new(WorkerEngine::new(
        client,
        registry,
        EngineSettings::from_config(&config),
    ));
    let lifecycle = WorkerLifecycle::from_config(engine.clone(), &config);

    lifecycle.run_until_signal().await?;

    let stats = engine.stats();
    info!(
        "✅ Worker stopped (delivered: {}, handled: {}, failed: {}, unrouted: {})",
        stats.delivered, stats.handled, stats.failed, stats.unrouted
    );
    Ok(())
}
