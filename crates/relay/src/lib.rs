//! Outbox relay process: drains committed outbox entries from PostgreSQL to
//! a publisher, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod telemetry;

use std::future::Future;

use application::{OutboxRelay, Publisher};
use sqlx::postgres::PgPoolOptions;
use store::{OutboxReader, PostgresStore, StoreError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use config::{ConfigError, LogFormat, RelayConfig};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Could not connect to the database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Could not migrate the database: {0}")]
    Migration(#[from] StoreError),

    #[error("Could not start the metrics endpoint: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Connects to PostgreSQL and applies pending migrations.
pub async fn connect(config: &RelayConfig) -> Result<PostgresStore, StartupError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    let store = PostgresStore::new(pool);
    store.run_migrations().await?;
    Ok(store)
}

/// Relays until `shutdown` resolves, then lets the current round finish.
pub async fn run<R: OutboxReader, P: Publisher>(
    reader: R,
    publisher: P,
    config: &RelayConfig,
    shutdown: impl Future<Output = ()>,
) {
    let relay = OutboxRelay::new(reader, publisher, config.relay_options());
    let token = CancellationToken::new();

    let relay_loop = relay.run(token.clone());
    tokio::pin!(relay_loop);

    tokio::select! {
        () = &mut relay_loop => {}
        () = shutdown => {
            token.cancel();
            relay_loop.await;
        }
    }
}
