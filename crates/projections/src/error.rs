//! Projection error types.

use application::HandlerError;
use common::{AggregateId, Version};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Reading the outbox during catch-up failed.
    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    /// Failed to deserialize an event payload.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// An event arrived for an account the view has never seen opened.
    #[error("No entry for aggregate {aggregate_id} at sequence {sequence}")]
    MissingEntry {
        aggregate_id: AggregateId,
        sequence: Version,
    },

    #[error("Projection error: {0}")]
    Projection(String),
}

impl From<ProjectionError> for HandlerError {
    fn from(e: ProjectionError) -> Self {
        HandlerError::new(e.to_string())
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
