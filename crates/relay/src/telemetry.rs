//! Tracing and metrics setup.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, RelayConfig};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when it parses.
pub fn init_tracing(config: &RelayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Starts the Prometheus scrape endpoint, if one is configured.
///
/// Must be called from within the tokio runtime.
pub fn init_metrics(config: &RelayConfig) -> Result<(), BuildError> {
    let Some(addr) = config.metrics_addr else {
        return Ok(());
    };
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    metrics::describe_counter!(
        "outbox_messages_published_total",
        "Outbox entries acknowledged by the publisher"
    );
    metrics::describe_counter!(
        "outbox_relay_failures_total",
        "Relay rounds that ended with an error"
    );
    tracing::info!(%addr, "metrics endpoint listening");
    Ok(())
}
