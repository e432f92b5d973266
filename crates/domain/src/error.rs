//! Domain error types.

use thiserror::Error;

/// An aggregate operation was rejected because it would break an invariant.
///
/// Always recoverable by the caller with corrected input. `rule` is a stable
/// machine-readable name of the broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Domain rule '{rule}' violated: {message}")]
pub struct DomainRuleViolation {
    pub rule: &'static str,
    pub message: String,
}

impl DomainRuleViolation {
    pub fn new(rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

/// A value object could not be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("Currency code must be three uppercase ASCII letters, got '{0}'")]
    InvalidCurrency(String),

    #[error("Amount must not be negative, got {0}")]
    NegativeAmount(i64),

    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },

    #[error("Amount overflow")]
    Overflow,

    #[error("Account holder name must not be empty")]
    EmptyHolderName,

    #[error("Account holder name is longer than {max} characters")]
    HolderNameTooLong { max: usize },
}
