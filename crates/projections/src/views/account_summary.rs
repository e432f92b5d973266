//! Account summary read model: one row per account with its balance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, Version};
use domain::{Account, AccountEvent, AccountStatus, AggregateRoot};
use serde::Serialize;
use store::EventEnvelope;
use tokio::sync::RwLock;

use crate::Result;
use crate::error::ProjectionError;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub account_id: AggregateId,
    pub holder: String,
    pub currency: String,
    /// Balance in minor units.
    pub balance: i64,
    pub status: AccountStatus,
    pub freeze_reason: Option<String>,
    /// Sequence of the last event applied to this row.
    pub last_sequence: Version,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read model view over every account.
#[derive(Clone, Default)]
pub struct AccountSummaryView {
    accounts: Arc<RwLock<HashMap<AggregateId, AccountSummary>>>,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl AccountSummaryView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, account_id: AggregateId) -> Option<AccountSummary> {
        self.accounts.read().await.get(&account_id).cloned()
    }

    /// Accounts ordered by opening time, optionally filtered by status.
    pub async fn list(&self, status: Option<AccountStatus>) -> Vec<AccountSummary> {
        let mut accounts: Vec<_> = self
            .accounts
            .read()
            .await
            .values()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect();
        accounts.sort_by_key(|a| (a.opened_at, a.account_id));
        accounts
    }

    /// Sum of balances of all open accounts held in `currency`.
    pub async fn total_balance(&self, currency: &str) -> i64 {
        self.accounts
            .read()
            .await
            .values()
            .filter(|a| a.currency == currency && !a.status.is_terminal())
            .map(|a| a.balance)
            .sum()
    }
}

#[async_trait]
impl Projection for AccountSummaryView {
    fn name(&self) -> &'static str {
        "AccountSummaryView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        if event.aggregate_type != Account::aggregate_type() {
            let mut pos = self.position.write().await;
            *pos = pos.skipped();
            return Ok(());
        }

        let account_event: AccountEvent = event.decode()?;
        let account_id = event.aggregate_id;
        let mut accounts = self.accounts.write().await;

        if let Some(existing) = accounts.get(&account_id)
            && existing.last_sequence >= event.sequence
        {
            tracing::trace!(%account_id, sequence = %event.sequence, "event already applied");
            let mut pos = self.position.write().await;
            *pos = pos.skipped();
            return Ok(());
        }

        if let AccountEvent::AccountOpened(data) = account_event {
            accounts.insert(
                account_id,
                AccountSummary {
                    account_id,
                    holder: data.holder.as_str().to_string(),
                    currency: data.currency.as_str().to_string(),
                    balance: 0,
                    status: AccountStatus::Active,
                    freeze_reason: None,
                    last_sequence: event.sequence,
                    opened_at: event.occurred_at,
                    updated_at: event.occurred_at,
                },
            );
        } else {
            let summary = accounts
                .get_mut(&account_id)
                .ok_or(ProjectionError::MissingEntry {
                    aggregate_id: account_id,
                    sequence: event.sequence,
                })?;
            if event.sequence != summary.last_sequence.next() {
                tracing::warn!(
                    %account_id,
                    expected = %summary.last_sequence.next(),
                    got = %event.sequence,
                    "gap in account events"
                );
            }

            match account_event {
                AccountEvent::FundsDeposited(data) | AccountEvent::FundsWithdrawn(data) => {
                    summary.balance = data.balance.minor_units();
                }
                AccountEvent::AccountFrozen(data) => {
                    summary.status = AccountStatus::Frozen;
                    summary.freeze_reason = Some(data.reason);
                }
                AccountEvent::AccountUnfrozen => {
                    summary.status = AccountStatus::Active;
                    summary.freeze_reason = None;
                }
                AccountEvent::AccountClosed => summary.status = AccountStatus::Closed,
                AccountEvent::AccountOpened(_) => {}
            }
            summary.last_sequence = event.sequence;
            summary.updated_at = event.occurred_at;
        }

        let mut pos = self.position.write().await;
        *pos = pos.applied();
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        self.accounts.write().await.clear();
        *self.position.write().await = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for AccountSummaryView {
    fn name(&self) -> &'static str {
        "AccountSummaryView"
    }

    fn count(&self) -> usize {
        self.accounts.try_read().map(|a| a.len()).unwrap_or(0)
    }
}
