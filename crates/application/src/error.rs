//! Application error types.

use common::{AggregateId, Version};
use domain::{DomainRuleViolation, ValueError};
use store::StoreError;
use thiserror::Error;

/// Rule reported when a creation command targets an aggregate that exists.
pub const AGGREGATE_ALREADY_EXISTS: &str = "aggregate_already_exists";

/// One rejected field of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Every field problem found in a request, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    /// Records the error of a fallible check, if any.
    pub fn check<T, E: std::fmt::Display>(&mut self, field: &'static str, result: Result<T, E>) {
        if let Err(e) = result {
            self.add(field, e.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// Returns `Ok` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

/// Errors returned by the dispatcher.
///
/// Every variant except `Infrastructure` is recoverable by the caller:
/// fix the input, reload and retry, or give up.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The aggregate refused the operation.
    #[error(transparent)]
    DomainRuleViolation(#[from] DomainRuleViolation),

    /// The command or query targets an aggregate that does not exist.
    #[error("Aggregate not found: {0}")]
    NotFound(AggregateId),

    /// The aggregate changed since it was loaded.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The request is malformed.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// The request needs a principal and none was given.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The caller cancelled before the commit.
    #[error("Request cancelled before commit")]
    Cancelled,

    /// Storage or serialization failed.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl DispatchError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::DomainRuleViolation(_) => "domain_rule_violation",
            DispatchError::NotFound(_) => "not_found",
            DispatchError::ConcurrencyConflict { .. } => "concurrency_conflict",
            DispatchError::Validation(_) => "validation",
            DispatchError::Unauthorized(_) => "unauthorized",
            DispatchError::Cancelled => "cancelled",
            DispatchError::Infrastructure(_) => "infrastructure",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DispatchError::ConcurrencyConflict { .. })
    }

    pub(crate) fn already_exists(aggregate_type: &str, aggregate_id: AggregateId) -> Self {
        DispatchError::DomainRuleViolation(DomainRuleViolation::new(
            AGGREGATE_ALREADY_EXISTS,
            format!("{aggregate_type} {aggregate_id} already exists"),
        ))
    }
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => DispatchError::NotFound(id),
            StoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => DispatchError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            },
            other => DispatchError::Infrastructure(other.to_string()),
        }
    }
}

impl From<ValidationErrors> for DispatchError {
    fn from(e: ValidationErrors) -> Self {
        DispatchError::Validation(e)
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(e: serde_json::Error) -> Self {
        DispatchError::Infrastructure(format!("serialization failed: {e}"))
    }
}

impl From<ValueError> for DispatchError {
    fn from(e: ValueError) -> Self {
        DispatchError::Validation(ValidationErrors::single("value", e.to_string()))
    }
}
