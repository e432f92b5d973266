pub mod envelope;
pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod record;
pub mod unit_of_work;

pub use common::{AggregateId, Version};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder, MessageId};
pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use outbox::{OutboxEntry, OutboxQuery, validate_outbox_batch};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use record::{AggregateRecord, validate_record_for_save};
pub use unit_of_work::{OutboxReader, Repository, Transaction, UnitOfWork, UnitOfWorkExt};
