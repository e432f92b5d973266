use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    AggregateId, AggregateRecord, EventEnvelope, OutboxEntry, OutboxQuery, Result, StoreError,
    Version,
    outbox::validate_outbox_batch,
    record::validate_record_for_save,
    unit_of_work::{OutboxReader, Repository, Transaction, UnitOfWork},
};

#[derive(Debug, Default)]
struct State {
    records: HashMap<AggregateId, AggregateRecord>,
    outbox: Vec<OutboxEntry>,
    next_position: i64,
}

/// In-memory store implementation.
///
/// Commits take the single write lock, re-check every expected version and
/// then apply all staged records and outbox messages at once, so readers
/// never observe half of a transaction.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit fail with [`StoreError::Unavailable`] after
    /// validation, as if the storage went away.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Returns the number of stored aggregates.
    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Returns the number of outbox entries, published or not.
    pub async fn outbox_len(&self) -> usize {
        self.state.read().await.outbox.len()
    }

    /// Clears all records and outbox entries.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.records.clear();
        state.outbox.clear();
    }
}

#[async_trait]
impl Repository for InMemoryStore {
    async fn find(&self, aggregate_id: AggregateId) -> Result<Option<AggregateRecord>> {
        Ok(self.state.read().await.records.get(&aggregate_id).cloned())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        Ok(InMemoryTransaction {
            store: self.clone(),
            records: Vec::new(),
            outbox: Vec::new(),
        })
    }
}

#[async_trait]
impl OutboxReader for InMemoryStore {
    async fn query_outbox(&self, query: OutboxQuery) -> Result<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        let entries = state
            .outbox
            .iter()
            .filter(|e| query.matches(e))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(entries)
    }

    async fn mark_published(&self, positions: &[i64]) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        for entry in state
            .outbox
            .iter_mut()
            .filter(|e| positions.contains(&e.position) && !e.is_published())
        {
            entry.published_at = Some(now);
        }
        Ok(())
    }
}

/// Buffer of writes for [`InMemoryStore`].
pub struct InMemoryTransaction {
    store: InMemoryStore,
    records: Vec<(AggregateRecord, Version)>,
    outbox: Vec<EventEnvelope>,
}

impl InMemoryTransaction {
    /// Version the aggregate would have if this transaction committed now.
    fn visible_version(&self, state: &State, aggregate_id: AggregateId) -> Version {
        self.records
            .iter()
            .rev()
            .find(|(r, _)| r.aggregate_id == aggregate_id)
            .map(|(r, _)| r.version)
            .or_else(|| state.records.get(&aggregate_id).map(|r| r.version))
            .unwrap_or(Version::initial())
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn save(&mut self, record: AggregateRecord, expected_version: Version) -> Result<()> {
        validate_record_for_save(&record, expected_version)?;

        // Early check so a stale writer fails before doing more work; the
        // authoritative check happens again under the write lock in commit.
        let actual = {
            let state = self.store.state.read().await;
            self.visible_version(&state, record.aggregate_id)
        };
        if actual != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id: record.aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        self.records.push((record, expected_version));
        Ok(())
    }

    async fn append_outbox(&mut self, messages: Vec<EventEnvelope>) -> Result<()> {
        let mut combined = self.outbox.clone();
        combined.extend(messages);
        validate_outbox_batch(&combined)?;
        self.outbox = combined;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.store.state.write().await;

        // Versions are checked in staging order, so a transaction saving the
        // same aggregate twice must chain the versions.
        let mut committed: HashMap<AggregateId, Version> = HashMap::new();
        for (record, expected) in &self.records {
            let actual = committed
                .get(&record.aggregate_id)
                .copied()
                .or_else(|| state.records.get(&record.aggregate_id).map(|r| r.version))
                .unwrap_or(Version::initial());
            if actual != *expected {
                return Err(StoreError::ConcurrencyConflict {
                    aggregate_id: record.aggregate_id,
                    expected: *expected,
                    actual,
                });
            }
            committed.insert(record.aggregate_id, record.version);
        }

        if self.store.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store configured to fail".to_string(),
            ));
        }

        for (record, _) in self.records {
            state.records.insert(record.aggregate_id, record);
        }
        for message in self.outbox {
            state.next_position += 1;
            let position = state.next_position;
            state.outbox.push(OutboxEntry {
                position,
                message,
                published_at: None,
            });
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
