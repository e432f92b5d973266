//! Domain model for the application core.
//!
//! This crate has no infrastructure dependencies:
//! - [`AggregateRoot`] trait for state-based aggregates with pending events
//! - [`DomainEvent`] trait and the [`RecordedEvent`] wrapper
//! - [`Clock`] as the only source of time
//! - the [`Account`] aggregate with its value objects

pub mod account;
pub mod aggregate;
pub mod clock;
pub mod error;

pub use account::{
    Account, AccountEvent, AccountFrozenData, AccountHolder, AccountOpenedData, AccountStatus,
    Currency, FundsMovedData, Money, rules,
};
pub use aggregate::{AggregateRoot, DomainEvent, RecordedEvent};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainRuleViolation, ValueError};
