//! Account domain events.

use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{AccountHolder, Currency, Money};

/// Events that can occur on an account aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AccountEvent {
    AccountOpened(AccountOpenedData),
    FundsDeposited(FundsMovedData),
    FundsWithdrawn(FundsMovedData),
    AccountFrozen(AccountFrozenData),
    AccountUnfrozen,
    AccountClosed,
}

impl AccountEvent {
    pub const OPENED: &'static str = "AccountOpened";
    pub const DEPOSITED: &'static str = "FundsDeposited";
    pub const WITHDRAWN: &'static str = "FundsWithdrawn";
    pub const FROZEN: &'static str = "AccountFrozen";
    pub const UNFROZEN: &'static str = "AccountUnfrozen";
    pub const CLOSED: &'static str = "AccountClosed";
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountOpened(_) => Self::OPENED,
            AccountEvent::FundsDeposited(_) => Self::DEPOSITED,
            AccountEvent::FundsWithdrawn(_) => Self::WITHDRAWN,
            AccountEvent::AccountFrozen(_) => Self::FROZEN,
            AccountEvent::AccountUnfrozen => Self::UNFROZEN,
            AccountEvent::AccountClosed => Self::CLOSED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountOpenedData {
    pub holder: AccountHolder,
    pub currency: Currency,
}

/// Payload shared by deposits and withdrawals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundsMovedData {
    pub amount: Money,
    /// Balance after the movement.
    pub balance: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountFrozenData {
    pub reason: String,
}
