//! The command/query dispatcher.

use std::sync::Arc;
use std::time::Instant;

use domain::{AggregateRoot, Clock, SystemClock};
use store::{EventEnvelope, Transaction, UnitOfWork, UnitOfWorkExt};

use crate::error::DispatchError;
use crate::events::{DeliveryReport, EventDispatcher};
use crate::handler::{CommandHandler, HandlerRegistry, QueryHandler};
use crate::persistence::{load_aggregate, to_envelopes, to_record};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::propagation::PropagationConfig;
use crate::request::{Ack, Command, Query, RequestContext, RequestInfo};

/// A committed command together with what happened to its events.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub ack: Ack,
    pub delivery: DeliveryReport,
}

/// Routes commands and queries to their handlers.
///
/// For a command:
/// 1. the pipeline stages run in order;
/// 2. the aggregate is loaded and handed to the command's handler;
/// 3. the new state and the propagated events are written in one
///    transaction, guarded by the version the aggregate was loaded at;
/// 4. after the commit the events go to the [`EventDispatcher`].
///
/// Nothing is written when any step before the commit fails. Cancellation
/// through the request context is honored up to the commit and ignored
/// after it.
pub struct Dispatcher<U: UnitOfWork> {
    uow: U,
    pipeline: Pipeline,
    events: EventDispatcher,
    propagation: PropagationConfig,
    clock: Arc<dyn Clock>,
    handlers: HandlerRegistry,
}

impl<U: UnitOfWork> Dispatcher<U> {
    pub fn builder(uow: U) -> DispatcherBuilder<U> {
        DispatcherBuilder::new(uow)
    }

    pub fn unit_of_work(&self) -> &U {
        &self.uow
    }

    pub fn event_dispatcher(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Executes a command and acknowledges the commit.
    pub async fn dispatch<C: Command>(
        &self,
        command: C,
        ctx: &RequestContext,
    ) -> Result<Ack, DispatchError> {
        self.dispatch_detailed(command, ctx).await.map(|d| d.ack)
    }

    /// Executes a command and also returns the event delivery report.
    #[tracing::instrument(skip_all, fields(command = C::NAME, aggregate_id = %command.aggregate_id()))]
    pub async fn dispatch_detailed<C: Command>(
        &self,
        command: C,
        ctx: &RequestContext,
    ) -> Result<Dispatched, DispatchError> {
        let started = Instant::now();
        let info = RequestInfo::command(&command);

        let result = self.execute(&command, &info, ctx).await;

        let elapsed = started.elapsed();
        self.pipeline.after(&info, ctx, result.as_ref().err(), elapsed);
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!("commands_dispatched_total", "command" => C::NAME, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("command_duration_seconds", "command" => C::NAME)
            .record(elapsed.as_secs_f64());

        result
    }

    /// Runs a query. Nothing is written.
    #[tracing::instrument(skip_all, fields(query = Q::NAME))]
    pub async fn query<Q: Query>(
        &self,
        query: Q,
        ctx: &RequestContext,
    ) -> Result<Q::Projection, DispatchError> {
        let started = Instant::now();
        let info = RequestInfo::query(&query);

        let result = async {
            self.pipeline.before(&info, ctx).await?;
            ensure_not_cancelled(ctx)?;
            let handler = self.handlers.query::<Q>()?;
            handler.handle(&query, ctx).await
        }
        .await;

        let elapsed = started.elapsed();
        self.pipeline.after(&info, ctx, result.as_ref().err(), elapsed);
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!("queries_dispatched_total", "query" => Q::NAME, "outcome" => outcome)
            .increment(1);

        result
    }

    async fn execute<C: Command>(
        &self,
        command: &C,
        info: &RequestInfo<'_>,
        ctx: &RequestContext,
    ) -> Result<Dispatched, DispatchError> {
        self.pipeline.before(info, ctx).await?;
        ensure_not_cancelled(ctx)?;

        let handler = self.handlers.command::<C>()?;
        let aggregate_id = command.aggregate_id();
        let current = load_aggregate::<C::Aggregate, _>(&self.uow, aggregate_id).await?;

        let mut aggregate = handler.handle(command, current, self.clock.as_ref())?;
        if aggregate.id() != aggregate_id {
            return Err(DispatchError::Infrastructure(format!(
                "handler for {} returned aggregate {} instead of {aggregate_id}",
                C::NAME,
                aggregate.id()
            )));
        }

        let expected = aggregate.persisted_version();
        let version = aggregate.version();
        let pending = aggregate.take_pending_events();
        if pending.len() > 1 {
            return Err(DispatchError::Infrastructure(format!(
                "handler for {} ran {} aggregate operations, expected at most one",
                C::NAME,
                pending.len()
            )));
        }
        if pending.is_empty() {
            return Ok(Dispatched {
                ack: Ack {
                    aggregate_id,
                    version,
                },
                delivery: DeliveryReport::default(),
            });
        }

        let record = to_record(&aggregate)?;
        let envelopes = to_envelopes(&pending, ctx)?;
        let outbox: Vec<EventEnvelope> = envelopes
            .iter()
            .filter(|e| self.propagation.propagates(&e.event_type))
            .cloned()
            .collect();

        let slot = self.events.reserve(aggregate_id);
        let cancellation = ctx.cancellation.clone();
        let committed: Result<(), DispatchError> = self
            .uow
            .with_transaction(move |tx| {
                Box::pin(async move {
                    tx.save(record, expected).await?;
                    if !outbox.is_empty() {
                        tx.append_outbox(outbox).await?;
                    }
                    // Last point where cancellation can still undo the work.
                    if cancellation.is_cancelled() {
                        return Err(DispatchError::Cancelled);
                    }
                    Ok::<(), DispatchError>(())
                })
            })
            .await;
        if let Err(e) = committed {
            self.events.release(slot);
            return Err(e);
        }

        tracing::debug!(
            %aggregate_id,
            expected = %expected,
            version = %version,
            events = envelopes.len(),
            "command committed"
        );

        let delivery = self.events.deliver(slot, envelopes).await;
        Ok(Dispatched {
            ack: Ack {
                aggregate_id,
                version,
            },
            delivery,
        })
    }
}

impl<U: UnitOfWork> std::fmt::Debug for Dispatcher<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pipeline", &self.pipeline)
            .field("event_handlers", &self.events.handler_names())
            .field("delivery_mode", &self.events.mode())
            .field("propagation", &self.propagation)
            .field("request_handlers", &self.handlers.len())
            .finish()
    }
}

fn ensure_not_cancelled(ctx: &RequestContext) -> Result<(), DispatchError> {
    if ctx.is_cancelled() {
        return Err(DispatchError::Cancelled);
    }
    Ok(())
}

/// Assembles a [`Dispatcher`] at startup.
///
/// Everything configured here is fixed once [`DispatcherBuilder::build`]
/// returns.
pub struct DispatcherBuilder<U: UnitOfWork> {
    uow: U,
    pipeline: Pipeline,
    events: EventDispatcher,
    propagation: PropagationConfig,
    clock: Arc<dyn Clock>,
    handlers: HandlerRegistry,
}

impl<U: UnitOfWork> DispatcherBuilder<U> {
    /// Starts with the default pipeline, inline delivery, no propagation
    /// and the system clock.
    pub fn new(uow: U) -> Self {
        Self {
            uow,
            pipeline: Pipeline::from_config(&PipelineConfig::default()),
            events: EventDispatcher::default(),
            propagation: PropagationConfig::default(),
            clock: Arc::new(SystemClock),
            handlers: HandlerRegistry::default(),
        }
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn event_dispatcher(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn propagation(mut self, propagation: PropagationConfig) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers the handler for a command type, replacing any earlier one.
    pub fn command<C, H>(mut self, handler: H) -> Self
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        self.handlers.insert_command::<C>(Arc::new(handler));
        self
    }

    /// Registers the handler for a query type, replacing any earlier one.
    pub fn query<Q, H>(mut self, handler: H) -> Self
    where
        Q: Query,
        H: QueryHandler<Q> + 'static,
    {
        self.handlers.insert_query::<Q>(Arc::new(handler));
        self
    }

    pub fn unit_of_work(&self) -> &U {
        &self.uow
    }

    pub fn build(self) -> Dispatcher<U> {
        Dispatcher {
            uow: self.uow,
            pipeline: self.pipeline,
            events: self.events,
            propagation: self.propagation,
            clock: self.clock,
            handlers: self.handlers,
        }
    }
}
