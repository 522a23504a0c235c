use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::config::Config;
use crate::engine::WorkerEngine;
use crate::error::WorkerError;
use crate::utils;

/// Default bound on how long `stop` waits for the engine to drain
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Starts and stops a [`WorkerEngine`] in step with the host process
pub struct WorkerLifecycle {
    engine: Arc<WorkerEngine>,
    stop_timeout: Duration,
}

impl WorkerLifecycle {
    pub fn new(engine: Arc<WorkerEngine>, stop_timeout: Duration) -> Self {
        Self { engine, stop_timeout }
    }

    /// Use the configured shutdown timeout
    pub fn from_config(engine: Arc<WorkerEngine>, config: &Config) -> Self {
        Self::new(engine, config.stop_timeout())
    }

    pub fn engine(&self) -> &Arc<WorkerEngine> {
        &self.engine
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        self.engine.start().await
    }

    /// Drain the engine, giving up after the stop timeout
    pub async fn stop(&self) -> Result<(), WorkerError> {
        let result = self.engine.stop(self.stop_timeout).await;
        if let Err(e) = &result {
            error!("❌ Worker engine shutdown incomplete: {}", e);
        }
        result
    }

    /// Start, wait for `shutdown` to resolve, then stop
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), WorkerError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        info!("🛑 Shutdown requested, stopping worker engine");
        self.stop().await
    }

    /// Run until SIGTERM or SIGINT
    pub async fn run_until_signal(&self) -> Result<(), WorkerError> {
        self.run_until(utils::setup_signal_handlers()).await
    }
}
