//! Account aggregate and related types.

mod aggregate;
mod events;
mod status;
mod value_objects;

pub use aggregate::Account;
pub use events::{AccountEvent, AccountFrozenData, AccountOpenedData, FundsMovedData};
pub use status::AccountStatus;
pub use value_objects::{AccountHolder, Currency, Money};

/// Names of the account invariants, as reported in [`crate::DomainRuleViolation::rule`].
pub mod rules {
    pub const AMOUNT_MUST_BE_POSITIVE: &str = "amount_must_be_positive";
    pub const CURRENCY_MISMATCH: &str = "currency_mismatch";
    pub const INSUFFICIENT_FUNDS: &str = "insufficient_funds";
    pub const BALANCE_OVERFLOW: &str = "balance_overflow";
    pub const BALANCE_MUST_BE_ZERO: &str = "balance_must_be_zero";
    pub const ACCOUNT_FROZEN: &str = "account_frozen";
    pub const ACCOUNT_CLOSED: &str = "account_closed";
    pub const ALREADY_FROZEN: &str = "already_frozen";
    pub const NOT_FROZEN: &str = "not_frozen";
    pub const FREEZE_REASON_REQUIRED: &str = "freeze_reason_required";
}
