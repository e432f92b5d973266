//! Account activity read model: the event history of each account.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, Version};
use domain::{Account, AccountEvent, AggregateRoot};
use serde::Serialize;
use store::EventEnvelope;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

/// One line of an account's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub sequence: Version,
    pub event_type: String,
    /// Signed amount in minor units; negative for withdrawals.
    pub amount: Option<i64>,
    pub balance_after: Option<i64>,
    pub note: Option<String>,
    pub correlation_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

struct ActivityState {
    entries: HashMap<AggregateId, Vec<ActivityEntry>>,
    position: ProjectionPosition,
}

/// Read model view with the full activity of every account, oldest first.
#[derive(Clone)]
pub struct AccountActivityView {
    state: Arc<RwLock<ActivityState>>,
}

impl AccountActivityView {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ActivityState {
                entries: HashMap::new(),
                position: ProjectionPosition::zero(),
            })),
        }
    }

    pub async fn history(&self, account_id: AggregateId) -> Vec<ActivityEntry> {
        self.state
            .read()
            .await
            .entries
            .get(&account_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The latest `limit` entries, newest first.
    pub async fn recent(&self, account_id: AggregateId, limit: usize) -> Vec<ActivityEntry> {
        self.state
            .read()
            .await
            .entries
            .get(&account_id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub async fn contains(&self, account_id: AggregateId) -> bool {
        self.state.read().await.entries.contains_key(&account_id)
    }
}

impl Default for AccountActivityView {
    fn default() -> Self {
        Self::new()
    }
}

fn to_entry(event: &EventEnvelope, account_event: AccountEvent) -> ActivityEntry {
    let (amount, balance_after, note) = match account_event {
        AccountEvent::AccountOpened(data) => (None, Some(0), Some(data.holder.as_str().to_string())),
        AccountEvent::FundsDeposited(data) => (
            Some(data.amount.minor_units()),
            Some(data.balance.minor_units()),
            None,
        ),
        AccountEvent::FundsWithdrawn(data) => (
            Some(-data.amount.minor_units()),
            Some(data.balance.minor_units()),
            None,
        ),
        AccountEvent::AccountFrozen(data) => (None, None, Some(data.reason)),
        AccountEvent::AccountUnfrozen | AccountEvent::AccountClosed => (None, None, None),
    };

    ActivityEntry {
        sequence: event.sequence,
        event_type: event.event_type.clone(),
        amount,
        balance_after,
        note,
        correlation_id: event
            .metadata
            .get("correlation_id")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        occurred_at: event.occurred_at,
    }
}

#[async_trait]
impl Projection for AccountActivityView {
    fn name(&self) -> &'static str {
        "AccountActivityView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;

        if event.aggregate_type != Account::aggregate_type() {
            state.position = state.position.skipped();
            return Ok(());
        }

        let already_applied = state
            .entries
            .get(&event.aggregate_id)
            .and_then(|entries| entries.last())
            .is_some_and(|e| e.sequence >= event.sequence);
        if already_applied {
            state.position = state.position.skipped();
            return Ok(());
        }

        let account_event: AccountEvent = event.decode()?;
        state
            .entries
            .entry(event.aggregate_id)
            .or_default()
            .push(to_entry(event, account_event));
        state.position = state.position.applied();

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.position = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for AccountActivityView {
    fn name(&self) -> &'static str {
        "AccountActivityView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.entries.len()).unwrap_or(0)
    }
}
