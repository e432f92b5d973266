use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::{AggregateId, AggregateRecord, EventEnvelope, OutboxEntry, OutboxQuery, Result, StoreError, Version};

/// Read access to aggregate records.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Repository: Send + Sync {
    /// Loads the record of an aggregate.
    ///
    /// Fails with [`StoreError::NotFound`] if the aggregate was never saved.
    async fn load(&self, aggregate_id: AggregateId) -> Result<AggregateRecord> {
        self.find(aggregate_id)
            .await?
            .ok_or(StoreError::NotFound(aggregate_id))
    }

    /// Loads the record of an aggregate, returning None if it doesn't exist.
    async fn find(&self, aggregate_id: AggregateId) -> Result<Option<AggregateRecord>>;

    /// Returns the stored version of an aggregate, if any.
    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        Ok(self.find(aggregate_id).await?.map(|r| r.version))
    }
}

/// Writes staged inside one atomic unit.
///
/// Nothing a transaction does is visible to readers before
/// [`Transaction::commit`] returns `Ok`. Dropping a transaction without
/// committing discards it.
#[async_trait]
pub trait Transaction: Send {
    /// Stages a record replacing the aggregate at `expected_version`.
    ///
    /// Fails with [`StoreError::ConcurrencyConflict`] when the stored version
    /// differs. Use [`Version::initial`] to create a new aggregate.
    async fn save(&mut self, record: AggregateRecord, expected_version: Version) -> Result<()>;

    /// Stages integration messages in the outbox.
    async fn append_outbox(&mut self, messages: Vec<EventEnvelope>) -> Result<()>;

    /// Makes every staged write durable, or none of them.
    async fn commit(self) -> Result<()>;

    /// Discards every staged write.
    async fn rollback(self) -> Result<()>;
}

/// Factory for transactions over a repository.
#[async_trait]
pub trait UnitOfWork: Repository {
    type Tx: Transaction;

    async fn begin(&self) -> Result<Self::Tx>;
}

/// Extension trait providing the closure-scoped transaction helper.
#[async_trait]
pub trait UnitOfWorkExt: UnitOfWork {
    /// Runs `work` inside a transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back when it returns `Err`.
    /// All saves and outbox appends made through the transaction commit
    /// together or not at all.
    async fn with_transaction<F, T, E>(&self, work: F) -> std::result::Result<T, E>
    where
        F: for<'t> FnOnce(&'t mut Self::Tx) -> BoxFuture<'t, std::result::Result<T, E>> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        let mut tx = self.begin().await?;
        match work(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

// Blanket implementation for all UnitOfWork implementations
impl<T: UnitOfWork + ?Sized> UnitOfWorkExt for T {}

/// Read and acknowledge side of the outbox, used by the relay.
#[async_trait]
pub trait OutboxReader: Send + Sync {
    /// Returns up to `limit` unpublished entries in position order.
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        self.query_outbox(OutboxQuery::new().limit(limit)).await
    }

    /// Returns entries matching the query in position order.
    async fn query_outbox(&self, query: OutboxQuery) -> Result<Vec<OutboxEntry>>;

    /// Marks entries as delivered. Unknown positions are ignored.
    async fn mark_published(&self, positions: &[i64]) -> Result<()>;
}
