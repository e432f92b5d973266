//! Command and query handler traits and their registry.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::Clock;

use crate::error::DispatchError;
use crate::request::{Command, Query, RequestContext};

/// Decides what a command does to its aggregate.
///
/// The dispatcher loads the aggregate and hands it over; `current` is
/// `None` when the aggregate was never saved. The handler invokes exactly
/// one aggregate operation and returns the aggregate with its pending
/// events. Persisting is the dispatcher's job, and it rejects a handler
/// that leaves more than one pending event before anything is written.
pub trait CommandHandler<C: Command>: Send + Sync {
    fn handle(
        &self,
        command: &C,
        current: Option<C::Aggregate>,
        clock: &dyn Clock,
    ) -> Result<C::Aggregate, DispatchError>;
}

/// Answers a query from a read path.
///
/// Handlers must not write; the dispatcher never gives them a transaction.
#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    async fn handle(&self, query: &Q, ctx: &RequestContext) -> Result<Q::Projection, DispatchError>;
}

/// Handlers keyed by request type.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl HandlerRegistry {
    pub(crate) fn insert_command<C: Command>(&mut self, handler: Arc<dyn CommandHandler<C>>) {
        self.handlers.insert(TypeId::of::<C>(), Box::new(handler));
    }

    pub(crate) fn insert_query<Q: Query>(&mut self, handler: Arc<dyn QueryHandler<Q>>) {
        self.handlers.insert(TypeId::of::<Q>(), Box::new(handler));
    }

    pub(crate) fn command<C: Command>(&self) -> Result<Arc<dyn CommandHandler<C>>, DispatchError> {
        self.handlers
            .get(&TypeId::of::<C>())
            .and_then(|h| h.downcast_ref::<Arc<dyn CommandHandler<C>>>())
            .cloned()
            .ok_or_else(|| no_handler(C::NAME))
    }

    pub(crate) fn query<Q: Query>(&self) -> Result<Arc<dyn QueryHandler<Q>>, DispatchError> {
        self.handlers
            .get(&TypeId::of::<Q>())
            .and_then(|h| h.downcast_ref::<Arc<dyn QueryHandler<Q>>>())
            .cloned()
            .ok_or_else(|| no_handler(Q::NAME))
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }
}

fn no_handler(name: &str) -> DispatchError {
    DispatchError::Infrastructure(format!("no handler registered for {name}"))
}

/// Fails with "already exists" unless the aggregate was never saved.
pub fn require_absent<A: domain::AggregateRoot>(
    current: Option<A>,
    aggregate_id: common::AggregateId,
) -> Result<(), DispatchError> {
    match current {
        None => Ok(()),
        Some(_) => Err(DispatchError::already_exists(A::aggregate_type(), aggregate_id)),
    }
}

/// Returns the loaded aggregate or `NotFound`.
pub fn require_existing<A>(
    current: Option<A>,
    aggregate_id: common::AggregateId,
) -> Result<A, DispatchError> {
    current.ok_or(DispatchError::NotFound(aggregate_id))
}
