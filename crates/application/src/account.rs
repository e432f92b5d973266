//! Account commands, their handler and the aggregate-backed account query.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, Version};
use domain::{Account, AccountHolder, AccountStatus, Clock, Currency, Money};
use serde::Serialize;
use store::{Repository, UnitOfWork};

use crate::dispatcher::DispatcherBuilder;
use crate::error::{DispatchError, ValidationErrors};
use crate::handler::{CommandHandler, QueryHandler, require_absent, require_existing};
use crate::persistence::load_aggregate;
use crate::request::{Command, Query, RequestContext, Validate};

/// Opens a new account with a zero balance.
#[derive(Debug, Clone)]
pub struct OpenAccount {
    pub account_id: AggregateId,
    pub holder: String,
    pub currency: String,
}

impl OpenAccount {
    /// Creates the command with a generated account ID.
    pub fn new(holder: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            account_id: AggregateId::new(),
            holder: holder.into(),
            currency: currency.into(),
        }
    }
}

impl Validate for OpenAccount {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check("holder", AccountHolder::new(&self.holder));
        errors.check("currency", Currency::new(self.currency.clone()));
        errors.into_result()
    }
}

impl Command for OpenAccount {
    type Aggregate = Account;
    const NAME: &'static str = "OpenAccount";

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }
}

/// Adds money to an account.
#[derive(Debug, Clone)]
pub struct DepositFunds {
    pub account_id: AggregateId,
    /// Amount in minor units (cents).
    pub amount: i64,
    pub currency: String,
}

impl DepositFunds {
    pub fn new(account_id: AggregateId, amount: i64, currency: impl Into<String>) -> Self {
        Self {
            account_id,
            amount,
            currency: currency.into(),
        }
    }
}

impl Validate for DepositFunds {
    fn validate(&self) -> Result<(), ValidationErrors> {
        money(self.amount, &self.currency).map(|_| ())
    }
}

impl Command for DepositFunds {
    type Aggregate = Account;
    const NAME: &'static str = "DepositFunds";

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }
}

/// Takes money out of an account.
#[derive(Debug, Clone)]
pub struct WithdrawFunds {
    pub account_id: AggregateId,
    /// Amount in minor units (cents).
    pub amount: i64,
    pub currency: String,
}

impl WithdrawFunds {
    pub fn new(account_id: AggregateId, amount: i64, currency: impl Into<String>) -> Self {
        Self {
            account_id,
            amount,
            currency: currency.into(),
        }
    }
}

impl Validate for WithdrawFunds {
    fn validate(&self) -> Result<(), ValidationErrors> {
        money(self.amount, &self.currency).map(|_| ())
    }
}

impl Command for WithdrawFunds {
    type Aggregate = Account;
    const NAME: &'static str = "WithdrawFunds";

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }
}

#[derive(Debug, Clone)]
pub struct FreezeAccount {
    pub account_id: AggregateId,
    pub reason: String,
}

impl FreezeAccount {
    pub fn new(account_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            account_id,
            reason: reason.into(),
        }
    }
}

impl Validate for FreezeAccount {}

impl Command for FreezeAccount {
    type Aggregate = Account;
    const NAME: &'static str = "FreezeAccount";

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }
}

#[derive(Debug, Clone)]
pub struct UnfreezeAccount {
    pub account_id: AggregateId,
}

impl Validate for UnfreezeAccount {}

impl Command for UnfreezeAccount {
    type Aggregate = Account;
    const NAME: &'static str = "UnfreezeAccount";

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }
}

#[derive(Debug, Clone)]
pub struct CloseAccount {
    pub account_id: AggregateId,
}

impl Validate for CloseAccount {}

impl Command for CloseAccount {
    type Aggregate = Account;
    const NAME: &'static str = "CloseAccount";

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }
}

fn money(amount: i64, currency: &str) -> Result<Money, ValidationErrors> {
    let currency = Currency::new(currency)
        .map_err(|e| ValidationErrors::single("currency", e.to_string()))?;
    Money::new(amount, currency).map_err(|e| ValidationErrors::single("amount", e.to_string()))
}

/// Handles every account command.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccountCommandHandler;

impl CommandHandler<OpenAccount> for AccountCommandHandler {
    fn handle(
        &self,
        command: &OpenAccount,
        current: Option<Account>,
        clock: &dyn Clock,
    ) -> Result<Account, DispatchError> {
        require_absent(current, command.account_id)?;
        let holder = AccountHolder::new(&command.holder)
            .map_err(|e| ValidationErrors::single("holder", e.to_string()))?;
        let currency = Currency::new(command.currency.clone())
            .map_err(|e| ValidationErrors::single("currency", e.to_string()))?;
        Ok(Account::open(command.account_id, holder, currency, clock))
    }
}

impl CommandHandler<DepositFunds> for AccountCommandHandler {
    fn handle(
        &self,
        command: &DepositFunds,
        current: Option<Account>,
        clock: &dyn Clock,
    ) -> Result<Account, DispatchError> {
        let mut account = require_existing(current, command.account_id)?;
        account.deposit(money(command.amount, &command.currency)?, clock)?;
        Ok(account)
    }
}

impl CommandHandler<WithdrawFunds> for AccountCommandHandler {
    fn handle(
        &self,
        command: &WithdrawFunds,
        current: Option<Account>,
        clock: &dyn Clock,
    ) -> Result<Account, DispatchError> {
        let mut account = require_existing(current, command.account_id)?;
        account.withdraw(money(command.amount, &command.currency)?, clock)?;
        Ok(account)
    }
}

impl CommandHandler<FreezeAccount> for AccountCommandHandler {
    fn handle(
        &self,
        command: &FreezeAccount,
        current: Option<Account>,
        clock: &dyn Clock,
    ) -> Result<Account, DispatchError> {
        let mut account = require_existing(current, command.account_id)?;
        account.freeze(command.reason.clone(), clock)?;
        Ok(account)
    }
}

impl CommandHandler<UnfreezeAccount> for AccountCommandHandler {
    fn handle(
        &self,
        command: &UnfreezeAccount,
        current: Option<Account>,
        clock: &dyn Clock,
    ) -> Result<Account, DispatchError> {
        let mut account = require_existing(current, command.account_id)?;
        account.unfreeze(clock)?;
        Ok(account)
    }
}

impl CommandHandler<CloseAccount> for AccountCommandHandler {
    fn handle(
        &self,
        command: &CloseAccount,
        current: Option<Account>,
        clock: &dyn Clock,
    ) -> Result<Account, DispatchError> {
        let mut account = require_existing(current, command.account_id)?;
        account.close(clock)?;
        Ok(account)
    }
}

/// Current state of one account, read from its aggregate record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountDetails {
    pub account_id: AggregateId,
    pub version: Version,
    pub holder: String,
    pub balance: Money,
    pub status: AccountStatus,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountDetails {
    fn from(account: &Account) -> Self {
        use domain::AggregateRoot;

        Self {
            account_id: account.id(),
            version: account.version(),
            holder: account.holder().to_string(),
            balance: account.balance().clone(),
            status: account.status(),
            opened_at: account.opened_at(),
            updated_at: account.updated_at(),
        }
    }
}

/// Reads one account through the repository.
#[derive(Debug, Clone)]
pub struct GetAccount {
    pub account_id: AggregateId,
}

impl Validate for GetAccount {}

impl Query for GetAccount {
    type Projection = AccountDetails;
    const NAME: &'static str = "GetAccount";
}

pub struct GetAccountHandler<R> {
    repository: R,
}

impl<R: Repository> GetAccountHandler<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<R: Repository> QueryHandler<GetAccount> for GetAccountHandler<R> {
    async fn handle(
        &self,
        query: &GetAccount,
        _ctx: &RequestContext,
    ) -> Result<AccountDetails, DispatchError> {
        let account: Account = load_aggregate(&self.repository, query.account_id)
            .await?
            .ok_or(DispatchError::NotFound(query.account_id))?;
        Ok(AccountDetails::from(&account))
    }
}

/// Registers the account command handler and the [`GetAccount`] query.
pub fn register_account_handlers<U>(builder: DispatcherBuilder<U>) -> DispatcherBuilder<U>
where
    U: UnitOfWork + Clone + 'static,
{
    let repository = builder.unit_of_work().clone();
    builder
        .command::<OpenAccount, _>(AccountCommandHandler)
        .command::<DepositFunds, _>(AccountCommandHandler)
        .command::<WithdrawFunds, _>(AccountCommandHandler)
        .command::<FreezeAccount, _>(AccountCommandHandler)
        .command::<UnfreezeAccount, _>(AccountCommandHandler)
        .command::<CloseAccount, _>(AccountCommandHandler)
        .query::<GetAccount, _>(GetAccountHandler::new(repository))
}
