use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, EventEnvelope, StoreError};

/// A message in the transactional outbox.
///
/// `position` increases monotonically in commit order: an entry never
/// becomes visible after an entry with a higher position. Reading from the
/// last seen position therefore never skips an entry, and draining in
/// position order preserves the append order of every aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub position: i64,
    pub message: EventEnvelope,
    /// Set once the publisher has acknowledged the message.
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}

/// Filter over outbox entries.
#[derive(Debug, Clone, Default)]
pub struct OutboxQuery {
    /// Filter by aggregate ID.
    pub aggregate_id: Option<AggregateId>,

    /// Filter by event types (any of these types).
    pub event_types: Option<Vec<String>>,

    /// Only entries at or after this position.
    pub from_position: Option<i64>,

    /// Include entries already acknowledged by the publisher.
    pub include_published: bool,

    /// Maximum number of entries to return.
    pub limit: Option<usize>,
}

impl OutboxQuery {
    /// Creates a query for unpublished entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query over every entry, published or not.
    pub fn all() -> Self {
        Self {
            include_published: true,
            ..Default::default()
        }
    }

    pub fn for_aggregate(aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            include_published: true,
            ..Default::default()
        }
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types = Some(vec![event_type.into()]);
        self
    }

    pub fn event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn from_position(mut self, position: i64) -> Self {
        self.from_position = Some(position);
        self
    }

    pub fn include_published(mut self, include: bool) -> Self {
        self.include_published = include;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true when the entry passes every filter except `limit`.
    pub fn matches(&self, entry: &OutboxEntry) -> bool {
        if !self.include_published && entry.is_published() {
            return false;
        }
        if let Some(id) = self.aggregate_id
            && entry.message.aggregate_id != id
        {
            return false;
        }
        if let Some(ref types) = self.event_types
            && !types.contains(&entry.message.event_type)
        {
            return false;
        }
        if let Some(from) = self.from_position
            && entry.position < from
        {
            return false;
        }
        true
    }
}

/// Validates a batch of messages before it is staged in a transaction.
///
/// Messages of one aggregate must be in strictly increasing sequence order;
/// the outbox never reorders them.
pub fn validate_outbox_batch(messages: &[EventEnvelope]) -> Result<(), StoreError> {
    for (i, message) in messages.iter().enumerate() {
        if message.event_type.is_empty() {
            return Err(StoreError::InvalidWrite(
                "outbox message has an empty event_type".to_string(),
            ));
        }
        let earlier_same_aggregate = messages[..i]
            .iter()
            .rev()
            .find(|m| m.aggregate_id == message.aggregate_id);
        if let Some(previous) = earlier_same_aggregate
            && previous.sequence >= message.sequence
        {
            return Err(StoreError::InvalidWrite(format!(
                "outbox messages for {} are out of order: {} then {}",
                message.aggregate_id, previous.sequence, message.sequence
            )));
        }
    }
    Ok(())
}
