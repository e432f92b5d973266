//! Account aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, Version};
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateRoot, RecordedEvent};
use crate::clock::Clock;
use crate::error::DomainRuleViolation;

use super::events::{AccountFrozenData, AccountOpenedData, FundsMovedData};
use super::{AccountEvent, AccountHolder, AccountStatus, Currency, Money, rules};

/// Account aggregate root.
///
/// Holds a single-currency balance that can never go below zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    id: AggregateId,
    version: Version,
    holder: AccountHolder,
    currency: Currency,
    balance: Money,
    status: AccountStatus,
    opened_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    pending: Vec<RecordedEvent<AccountEvent>>,
}

impl AggregateRoot for Account {
    type Event = AccountEvent;

    fn aggregate_type() -> &'static str {
        "Account"
    }

    fn id(&self) -> AggregateId {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn pending_events(&self) -> &[RecordedEvent<AccountEvent>] {
        &self.pending
    }

    fn take_pending_events(&mut self) -> Vec<RecordedEvent<AccountEvent>> {
        std::mem::take(&mut self.pending)
    }
}

// Query methods
impl Account {
    pub fn holder(&self) -> &AccountHolder {
        &self.holder
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn balance(&self) -> &Money {
        &self.balance
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// Command methods
impl Account {
    /// Opens a new account with a zero balance.
    pub fn open(
        id: AggregateId,
        holder: AccountHolder,
        currency: Currency,
        clock: &dyn Clock,
    ) -> Self {
        let now = clock.now();
        let mut account = Self {
            id,
            version: Version::initial(),
            holder: holder.clone(),
            currency: currency.clone(),
            balance: Money::zero(currency.clone()),
            status: AccountStatus::Active,
            opened_at: now,
            updated_at: now,
            pending: Vec::new(),
        };
        account.record(
            AccountEvent::AccountOpened(AccountOpenedData { holder, currency }),
            now,
        );
        account
    }

    pub fn deposit(&mut self, amount: Money, clock: &dyn Clock) -> Result<(), DomainRuleViolation> {
        self.ensure_funds_can_move()?;
        self.ensure_valid_amount(&amount)?;

        let balance = self.balance.checked_add(&amount).map_err(|_| {
            DomainRuleViolation::new(
                rules::BALANCE_OVERFLOW,
                format!("depositing {amount} would overflow the balance"),
            )
        })?;

        self.balance = balance.clone();
        self.record(
            AccountEvent::FundsDeposited(FundsMovedData { amount, balance }),
            clock.now(),
        );
        Ok(())
    }

    pub fn withdraw(
        &mut self,
        amount: Money,
        clock: &dyn Clock,
    ) -> Result<(), DomainRuleViolation> {
        self.ensure_funds_can_move()?;
        self.ensure_valid_amount(&amount)?;

        let balance = self.balance.checked_sub(&amount).map_err(|_| {
            DomainRuleViolation::new(
                rules::INSUFFICIENT_FUNDS,
                format!("cannot withdraw {amount} from a balance of {}", self.balance),
            )
        })?;

        self.balance = balance.clone();
        self.record(
            AccountEvent::FundsWithdrawn(FundsMovedData { amount, balance }),
            clock.now(),
        );
        Ok(())
    }

    /// Blocks deposits and withdrawals until [`Account::unfreeze`].
    pub fn freeze(
        &mut self,
        reason: impl Into<String>,
        clock: &dyn Clock,
    ) -> Result<(), DomainRuleViolation> {
        self.ensure_not_closed()?;
        if self.status == AccountStatus::Frozen {
            return Err(DomainRuleViolation::new(
                rules::ALREADY_FROZEN,
                "account is already frozen",
            ));
        }
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainRuleViolation::new(
                rules::FREEZE_REASON_REQUIRED,
                "a reason is required to freeze an account",
            ));
        }

        self.status = AccountStatus::Frozen;
        self.record(
            AccountEvent::AccountFrozen(AccountFrozenData { reason }),
            clock.now(),
        );
        Ok(())
    }

    pub fn unfreeze(&mut self, clock: &dyn Clock) -> Result<(), DomainRuleViolation> {
        self.ensure_not_closed()?;
        if self.status != AccountStatus::Frozen {
            return Err(DomainRuleViolation::new(
                rules::NOT_FROZEN,
                "only a frozen account can be unfrozen",
            ));
        }

        self.status = AccountStatus::Active;
        self.record(AccountEvent::AccountUnfrozen, clock.now());
        Ok(())
    }

    pub fn close(&mut self, clock: &dyn Clock) -> Result<(), DomainRuleViolation> {
        self.ensure_funds_can_move()?;
        if !self.balance.is_zero() {
            return Err(DomainRuleViolation::new(
                rules::BALANCE_MUST_BE_ZERO,
                format!("cannot close an account holding {}", self.balance),
            ));
        }

        self.status = AccountStatus::Closed;
        self.record(AccountEvent::AccountClosed, clock.now());
        Ok(())
    }
}

// Invariant helpers
impl Account {
    fn record(&mut self, payload: AccountEvent, at: DateTime<Utc>) {
        self.version = self.version.next();
        self.updated_at = at;
        self.pending.push(RecordedEvent {
            aggregate_id: self.id,
            aggregate_type: Self::aggregate_type(),
            sequence: self.version,
            occurred_at: at,
            payload,
        });
    }

    fn ensure_not_closed(&self) -> Result<(), DomainRuleViolation> {
        if self.status.is_terminal() {
            return Err(DomainRuleViolation::new(
                rules::ACCOUNT_CLOSED,
                format!("account {} is closed", self.id),
            ));
        }
        Ok(())
    }

    fn ensure_funds_can_move(&self) -> Result<(), DomainRuleViolation> {
        self.ensure_not_closed()?;
        if !self.status.can_move_funds() {
            return Err(DomainRuleViolation::new(
                rules::ACCOUNT_FROZEN,
                format!("account {} is frozen", self.id),
            ));
        }
        Ok(())
    }

    fn ensure_valid_amount(&self, amount: &Money) -> Result<(), DomainRuleViolation> {
        if amount.currency() != &self.currency {
            return Err(DomainRuleViolation::new(
                rules::CURRENCY_MISMATCH,
                format!(
                    "account is held in {}, got {}",
                    self.currency,
                    amount.currency()
                ),
            ));
        }
        if !amount.is_positive() {
            return Err(DomainRuleViolation::new(
                rules::AMOUNT_MUST_BE_POSITIVE,
                "amount must be greater than zero",
            ));
        }
        Ok(())
    }
}
