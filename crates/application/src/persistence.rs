//! Conversions between aggregates and their stored forms.

use common::AggregateId;
use domain::{AggregateRoot, DomainEvent, RecordedEvent};
use store::{AggregateRecord, EventEnvelope, Repository};

use crate::error::DispatchError;
use crate::request::RequestContext;

/// Loads and deserializes an aggregate, or `None` if it was never saved.
///
/// The stored version must match the version inside the state; a mismatch
/// means the record was written by something other than this code.
pub async fn load_aggregate<A, R>(
    repository: &R,
    aggregate_id: AggregateId,
) -> Result<Option<A>, DispatchError>
where
    A: AggregateRoot,
    R: Repository + ?Sized,
{
    let Some(record) = repository.find(aggregate_id).await? else {
        return Ok(None);
    };

    if record.aggregate_type != A::aggregate_type() {
        return Err(DispatchError::Infrastructure(format!(
            "aggregate {aggregate_id} is a {}, not a {}",
            record.aggregate_type,
            A::aggregate_type()
        )));
    }

    let stored_version = record.version;
    let aggregate: A = record.into_state()?;
    if aggregate.version() != stored_version {
        return Err(DispatchError::Infrastructure(format!(
            "record of {aggregate_id} is at version {stored_version} but its state says {}",
            aggregate.version()
        )));
    }
    Ok(Some(aggregate))
}

pub(crate) fn to_record<A: AggregateRoot>(aggregate: &A) -> Result<AggregateRecord, DispatchError> {
    Ok(AggregateRecord::from_state(
        aggregate.id(),
        A::aggregate_type(),
        aggregate.version(),
        aggregate,
    )?)
}

/// Serializes recorded events, stamping request metadata on each.
pub(crate) fn to_envelopes<E: DomainEvent>(
    events: &[RecordedEvent<E>],
    ctx: &RequestContext,
) -> Result<Vec<EventEnvelope>, DispatchError> {
    events
        .iter()
        .map(|event| -> Result<EventEnvelope, DispatchError> {
            let mut builder = EventEnvelope::builder()
                .aggregate_id(event.aggregate_id)
                .aggregate_type(event.aggregate_type)
                .event_type(event.event_type())
                .sequence(event.sequence)
                .occurred_at(event.occurred_at)
                .payload(&event.payload)?
                .metadata(
                    "correlation_id",
                    serde_json::Value::String(ctx.correlation_id.to_string()),
                );
            if let Some(principal) = &ctx.principal {
                builder = builder.metadata(
                    "principal",
                    serde_json::Value::String(principal.to_string()),
                );
            }
            Ok(builder.build()?)
        })
        .collect()
}
