//! Core projection trait and its event handler adapter.

use std::sync::Arc;

use application::{EventHandler, HandlerError};
use async_trait::async_trait;
use store::EventEnvelope;

use crate::Result;

/// How many events a projection has applied and skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    pub events_applied: u64,
    /// Redelivered or foreign events that left the view unchanged.
    pub events_skipped: u64,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Self {
        Self {
            events_applied: self.events_applied + 1,
            ..*self
        }
    }

    pub fn skipped(&self) -> Self {
        Self {
            events_skipped: self.events_skipped + 1,
            ..*self
        }
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "position(applied={}, skipped={})",
            self.events_applied, self.events_skipped
        )
    }
}

/// Turns committed events into a read model.
///
/// Implementations must be idempotent per `(aggregate_id, sequence)`: the
/// same event may arrive once inline and again during catch-up.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    async fn position(&self) -> ProjectionPosition;

    /// Drops all state so the projection can be rebuilt.
    async fn reset(&self) -> Result<()>;
}

/// Registers a [`Projection`] with the event dispatcher.
pub struct ProjectionHandler<P> {
    projection: Arc<P>,
}

impl<P: Projection> ProjectionHandler<P> {
    pub fn new(projection: Arc<P>) -> Self {
        Self { projection }
    }

    /// Wraps the projection as a shared handler ready for
    /// [`application::EventDispatcher::with_handler`].
    pub fn shared(projection: Arc<P>) -> Arc<dyn EventHandler>
    where
        P: 'static,
    {
        Arc::new(Self::new(projection))
    }
}

#[async_trait]
impl<P: Projection> EventHandler for ProjectionHandler<P> {
    fn name(&self) -> &'static str {
        self.projection.name()
    }

    async fn handle(&self, event: &EventEnvelope) -> std::result::Result<(), HandlerError> {
        self.projection.handle(event).await?;
        metrics::counter!("projection_events_processed_total", "projection" => self.projection.name())
            .increment(1);
        Ok(())
    }
}
