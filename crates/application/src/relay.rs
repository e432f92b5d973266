//! Drains the outbox to an external publisher.

use std::time::Duration;

use async_trait::async_trait;
use store::{EventEnvelope, OutboxReader, StoreError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error returned by a [`Publisher`].
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker could not be reached; the message should be retried.
    #[error("Publisher unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Sends integration messages outside the process.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: &EventEnvelope) -> Result<(), PublishError>;
}

/// Publisher that writes every message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, message: &EventEnvelope) -> Result<(), PublishError> {
        tracing::info!(
            message_id = %message.message_id,
            aggregate_id = %message.aggregate_id,
            event_type = %message.event_type,
            sequence = %message.sequence,
            payload = %message.payload,
            "integration event published"
        );
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Outbox error: {0}")]
    Store(#[from] StoreError),

    #[error("Publishing outbox entry {position} failed: {source}")]
    Publish {
        position: i64,
        #[source]
        source: PublishError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    /// Maximum entries read per round.
    pub batch_size: usize,
    /// Pause after a round that found less than a full batch.
    pub poll_interval: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Moves committed outbox entries to a [`Publisher`].
///
/// Entries are published in position order and marked as published only
/// after the publisher accepted them. A crash between the two steps
/// publishes the entry again, so delivery is at-least-once and consumers
/// deduplicate on `message_id`. A publish failure stops the round so that
/// no later entry of the same aggregate overtakes the failed one.
pub struct OutboxRelay<R, P> {
    reader: R,
    publisher: P,
    options: RelayOptions,
}

impl<R: OutboxReader, P: Publisher> OutboxRelay<R, P> {
    pub fn new(reader: R, publisher: P, options: RelayOptions) -> Self {
        Self {
            reader,
            publisher,
            options,
        }
    }

    pub fn options(&self) -> RelayOptions {
        self.options
    }

    /// Publishes one batch and returns how many entries went out.
    #[tracing::instrument(skip(self))]
    pub async fn relay_once(&self) -> Result<usize, RelayError> {
        let batch = self.reader.pending(self.options.batch_size).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut published = Vec::with_capacity(batch.len());
        let mut failure = None;
        for entry in &batch {
            match self.publisher.publish(&entry.message).await {
                Ok(()) => published.push(entry.position),
                Err(source) => {
                    failure = Some(RelayError::Publish {
                        position: entry.position,
                        source,
                    });
                    break;
                }
            }
        }

        if !published.is_empty() {
            self.reader.mark_published(&published).await?;
            metrics::counter!("outbox_messages_published_total").increment(published.len() as u64);
            tracing::debug!(count = published.len(), "outbox entries published");
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(published.len()),
        }
    }

    /// Relays until `shutdown` is cancelled.
    ///
    /// Errors are logged and retried after the poll interval.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            batch_size = self.options.batch_size,
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            "outbox relay started"
        );

        loop {
            let idle = match self.relay_once().await {
                Ok(count) => count < self.options.batch_size,
                Err(e) => {
                    tracing::warn!(error = %e, "outbox relay round failed");
                    metrics::counter!("outbox_relay_failures_total").increment(1);
                    true
                }
            };

            if shutdown.is_cancelled() {
                break;
            }
            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.options.poll_interval) => {}
                }
            }
        }

        tracing::info!("outbox relay stopped");
    }
}
