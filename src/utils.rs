use anyhow::{anyhow, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LogFormat};

/// Build the log filter: `RUST_LOG` wins over the configured level
pub fn log_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
}

/// Install the global tracing subscriber for the binary
pub fn initialize_logging(config: &Config) -> Result<()> {
    let registry = tracing_subscriber::registry().with(log_filter(config));

    let installed = match config.logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init(),
        LogFormat::Console => registry.with(fmt::layer().with_target(false)).try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "📝 Logging initialized for service '{}' ({}), level '{}'",
        config.service.name, config.service.environment, config.logging.level
    );
    Ok(())
}

/// Setup signal handlers for graceful shutdown
pub async fn setup_signal_handlers() {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("📡 Received SIGTERM - initiating graceful shutdown");
                    }
                    _ = sigint.recv() => {
                        info!("📡 Received SIGINT (Ctrl+C) - initiating graceful shutdown");
                    }
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Unable to register unix signal handlers, falling back to Ctrl+C: {}", e);
            }
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("📡 Received Ctrl+C - initiating graceful shutdown");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }
}
