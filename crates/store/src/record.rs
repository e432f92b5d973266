use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, StoreError, Version};

/// The persisted state of one aggregate at one version.
///
/// The store keeps exactly one record per aggregate; a save replaces the
/// whole record or nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g. "Account").
    pub aggregate_type: String,

    /// Version the state is at.
    pub version: Version,

    /// When the record was written.
    pub updated_at: DateTime<Utc>,

    /// The serialized aggregate state.
    pub state: serde_json::Value,
}

impl AggregateRecord {
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            updated_at: Utc::now(),
            state,
        }
    }

    /// Creates a record from a serializable aggregate.
    pub fn from_state<T: Serialize>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            aggregate_id,
            aggregate_type,
            version,
            serde_json::to_value(state)?,
        ))
    }

    /// Deserializes the record state into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }
}

/// Checks a record against the version it is expected to replace.
///
/// A save must move the aggregate forward; saving the same or an older
/// version is a caller bug, not a conflict.
pub fn validate_record_for_save(record: &AggregateRecord, expected: Version) -> Result<(), StoreError> {
    if record.aggregate_type.is_empty() {
        return Err(StoreError::InvalidWrite(
            "aggregate_type must not be empty".to_string(),
        ));
    }
    if record.version <= expected {
        return Err(StoreError::InvalidWrite(format!(
            "record for {} is at version {}, which does not advance expected version {}",
            record.aggregate_id, record.version, expected
        )));
    }
    Ok(())
}
