//! Relay entry point.

use application::LogPublisher;
use relay::{RelayConfig, StartupError, telemetry};
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    // 1. Load configuration
    let config = RelayConfig::from_env()?;

    // 2. Initialize tracing and metrics
    telemetry::init_tracing(&config);
    telemetry::init_metrics(&config)?;

    // 3. Connect and migrate
    let store = relay::connect(&config).await?;
    tracing::info!(
        batch_size = config.batch_size,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "connected to database"
    );

    // 4. Relay until shutdown
    relay::run(store, LogPublisher, &config, shutdown_signal()).await;

    tracing::info!("relay shut down gracefully");
    Ok(())
}
