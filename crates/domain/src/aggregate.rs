//! Core aggregate and domain event traits.

use chrono::{DateTime, Utc};
use common::{AggregateId, Version};
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain event payloads.
///
/// Domain events are facts about the past. They are immutable and named in
/// past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// Used for routing to handlers and for the outbox propagation filter.
    fn event_type(&self) -> &'static str;
}

/// A domain event together with the aggregate it happened to.
///
/// Created by an aggregate operation and queued on the aggregate until the
/// unit of work commits. `sequence` is the aggregate version the mutation
/// produced, so the events of one aggregate are totally ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent<E> {
    pub aggregate_id: AggregateId,
    pub aggregate_type: &'static str,
    pub sequence: Version,
    pub occurred_at: DateTime<Utc>,
    pub payload: E,
}

impl<E: DomainEvent> RecordedEvent<E> {
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

/// A consistency boundary persisted as a whole.
///
/// State is private to the implementing type and only changes through its
/// own operations. Each successful operation:
/// - validates every precondition before touching state,
/// - moves the aggregate to `version().next()`,
/// - queues exactly one [`RecordedEvent`].
///
/// The persisted form is the serde representation of the aggregate; pending
/// events are never part of it.
pub trait AggregateRoot: Serialize + DeserializeOwned + Send + Sync {
    /// The type of events this aggregate produces.
    type Event: DomainEvent;

    /// Returns the aggregate type name used in records and outbox messages.
    fn aggregate_type() -> &'static str;

    fn id(&self) -> AggregateId;

    /// Returns the version after the last applied mutation.
    fn version(&self) -> Version;

    /// Events produced since the aggregate was loaded, in append order.
    fn pending_events(&self) -> &[RecordedEvent<Self::Event>];

    /// Drains the pending events, handing ownership to the caller.
    fn take_pending_events(&mut self) -> Vec<RecordedEvent<Self::Event>>;

    /// Version the aggregate had when it was loaded (or 0 for a new one).
    ///
    /// This is the expected version for the optimistic concurrency check.
    fn persisted_version(&self) -> Version {
        Version::new(self.version().as_i64() - self.pending_events().len() as i64)
    }

    fn has_pending_events(&self) -> bool {
        !self.pending_events().is_empty()
    }
}
