//! Queries answered from the read models.

use std::sync::Arc;

use application::{
    DispatchError, DispatcherBuilder, Query, QueryHandler, RequestContext, Validate,
    ValidationErrors,
};
use async_trait::async_trait;
use common::AggregateId;
use domain::AccountStatus;
use store::UnitOfWork;

use crate::views::{AccountActivityView, AccountSummary, AccountSummaryView, ActivityEntry};

/// Largest page [`GetAccountActivity`] returns.
pub const MAX_ACTIVITY_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct GetAccountSummary {
    pub account_id: AggregateId,
}

impl Validate for GetAccountSummary {}

impl Query for GetAccountSummary {
    type Projection = AccountSummary;
    const NAME: &'static str = "GetAccountSummary";
}

/// Lists accounts, optionally only those in one status.
#[derive(Debug, Clone, Default)]
pub struct ListAccounts {
    pub status: Option<AccountStatus>,
}

impl Validate for ListAccounts {}

impl Query for ListAccounts {
    type Projection = Vec<AccountSummary>;
    const NAME: &'static str = "ListAccounts";
}

/// The latest activity of one account, newest first.
#[derive(Debug, Clone)]
pub struct GetAccountActivity {
    pub account_id: AggregateId,
    pub limit: usize,
}

impl Validate for GetAccountActivity {
    fn validate(&self) -> Result<(), ValidationErrors> {
        if self.limit == 0 || self.limit > MAX_ACTIVITY_LIMIT {
            return Err(ValidationErrors::single(
                "limit",
                format!("must be between 1 and {MAX_ACTIVITY_LIMIT}"),
            ));
        }
        Ok(())
    }
}

impl Query for GetAccountActivity {
    type Projection = Vec<ActivityEntry>;
    const NAME: &'static str = "GetAccountActivity";
}

pub struct AccountSummaryQueries {
    view: Arc<AccountSummaryView>,
}

impl AccountSummaryQueries {
    pub fn new(view: Arc<AccountSummaryView>) -> Self {
        Self { view }
    }
}

#[async_trait]
impl QueryHandler<GetAccountSummary> for AccountSummaryQueries {
    async fn handle(
        &self,
        query: &GetAccountSummary,
        _ctx: &RequestContext,
    ) -> Result<AccountSummary, DispatchError> {
        self.view
            .get(query.account_id)
            .await
            .ok_or(DispatchError::NotFound(query.account_id))
    }
}

#[async_trait]
impl QueryHandler<ListAccounts> for AccountSummaryQueries {
    async fn handle(
        &self,
        query: &ListAccounts,
        _ctx: &RequestContext,
    ) -> Result<Vec<AccountSummary>, DispatchError> {
        Ok(self.view.list(query.status).await)
    }
}

pub struct AccountActivityQueries {
    view: Arc<AccountActivityView>,
}

impl AccountActivityQueries {
    pub fn new(view: Arc<AccountActivityView>) -> Self {
        Self { view }
    }
}

#[async_trait]
impl QueryHandler<GetAccountActivity> for AccountActivityQueries {
    async fn handle(
        &self,
        query: &GetAccountActivity,
        _ctx: &RequestContext,
    ) -> Result<Vec<ActivityEntry>, DispatchError> {
        if !self.view.contains(query.account_id).await {
            return Err(DispatchError::NotFound(query.account_id));
        }
        Ok(self.view.recent(query.account_id, query.limit).await)
    }
}

/// Registers the read-model queries.
pub fn register_projection_queries<U: UnitOfWork>(
    builder: DispatcherBuilder<U>,
    summary: Arc<AccountSummaryView>,
    activity: Arc<AccountActivityView>,
) -> DispatcherBuilder<U> {
    builder
        .query::<GetAccountSummary, _>(AccountSummaryQueries::new(Arc::clone(&summary)))
        .query::<ListAccounts, _>(AccountSummaryQueries::new(summary))
        .query::<GetAccountActivity, _>(AccountActivityQueries::new(activity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_limit_is_bounded() {
        let id = AggregateId::new();
        assert!(GetAccountActivity { account_id: id, limit: 0 }.validate().is_err());
        assert!(
            GetAccountActivity {
                account_id: id,
                limit: MAX_ACTIVITY_LIMIT + 1
            }
            .validate()
            .is_err()
        );
        assert!(GetAccountActivity { account_id: id, limit: 10 }.validate().is_ok());
    }

    #[tokio::test]
    async fn missing_summary_is_not_found() {
        let queries = AccountSummaryQueries::new(Arc::new(AccountSummaryView::new()));
        let id = AggregateId::new();

        let result = queries
            .handle(&GetAccountSummary { account_id: id }, &RequestContext::default())
            .await;

        assert!(matches!(result, Err(DispatchError::NotFound(missing)) if missing == id));
    }
}
