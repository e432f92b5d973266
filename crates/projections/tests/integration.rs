//! Integration tests: dispatcher commands → event dispatcher → account views.

use std::sync::Arc;

use application::{
    CloseAccount, DepositFunds, DispatchError, Dispatcher, EventDispatcher, FreezeAccount,
    OpenAccount, PropagationConfig, RequestContext, WithdrawFunds, register_account_handlers,
};
use common::{AggregateId, Version};
use domain::{AccountEvent, AccountStatus};
use projections::{
    AccountActivityView, AccountSummaryView, GetAccountActivity, GetAccountSummary, ListAccounts,
    Projection, ProjectionHandler, ProjectionProcessor, register_projection_queries,
};
use store::InMemoryStore;

struct Setup {
    store: InMemoryStore,
    dispatcher: Dispatcher<InMemoryStore>,
    summary: Arc<AccountSummaryView>,
    activity: Arc<AccountActivityView>,
}

/// Wires both views as event handlers and registers every query.
fn setup(propagation: PropagationConfig) -> Setup {
    let store = InMemoryStore::new();
    let summary = Arc::new(AccountSummaryView::new());
    let activity = Arc::new(AccountActivityView::new());

    let events = EventDispatcher::default()
        .with_handler(ProjectionHandler::shared(Arc::clone(&summary)))
        .with_handler(ProjectionHandler::shared(Arc::clone(&activity)));
    let builder = Dispatcher::builder(store.clone())
        .event_dispatcher(events)
        .propagation(propagation);
    let builder = register_account_handlers(builder);
    let dispatcher =
        register_projection_queries(builder, Arc::clone(&summary), Arc::clone(&activity)).build();

    Setup {
        store,
        dispatcher,
        summary,
        activity,
    }
}

fn ctx() -> RequestContext {
    RequestContext::for_principal("back-office")
}

async fn open(dispatcher: &Dispatcher<InMemoryStore>, holder: &str) -> AggregateId {
    let cmd = OpenAccount::new(holder, "EUR");
    let id = cmd.account_id;
    dispatcher.dispatch(cmd, &ctx()).await.unwrap();
    id
}

#[tokio::test]
async fn test_account_lifecycle_across_views() {
    let s = setup(PropagationConfig::All);
    let id = open(&s.dispatcher, "Ada").await;

    s.dispatcher
        .dispatch(DepositFunds::new(id, 1_000, "EUR"), &ctx())
        .await
        .unwrap();
    s.dispatcher
        .dispatch(WithdrawFunds::new(id, 1_000, "EUR"), &ctx())
        .await
        .unwrap();
    s.dispatcher
        .dispatch(CloseAccount { account_id: id }, &ctx())
        .await
        .unwrap();

    let summary = s
        .dispatcher
        .query(GetAccountSummary { account_id: id }, &ctx())
        .await
        .unwrap();
    assert_eq!(summary.status, AccountStatus::Closed);
    assert_eq!(summary.balance, 0);
    assert_eq!(summary.last_sequence, Version::new(4));

    let activity = s
        .dispatcher
        .query(GetAccountActivity { account_id: id, limit: 10 }, &ctx())
        .await
        .unwrap();
    let types: Vec<_> = activity.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            AccountEvent::CLOSED,
            AccountEvent::WITHDRAWN,
            AccountEvent::DEPOSITED,
            AccountEvent::OPENED
        ]
    );
}

#[tokio::test]
async fn test_rejected_command_does_not_touch_views() {
    let s = setup(PropagationConfig::All);
    let id = open(&s.dispatcher, "Ada").await;

    let result = s
        .dispatcher
        .dispatch(WithdrawFunds::new(id, 1, "EUR"), &ctx())
        .await;

    assert!(matches!(result, Err(DispatchError::DomainRuleViolation(_))));
    assert_eq!(s.summary.get(id).await.unwrap().last_sequence, Version::new(1));
    assert_eq!(s.activity.history(id).await.len(), 1);
}

#[tokio::test]
async fn test_list_accounts_by_status() {
    let s = setup(PropagationConfig::All);
    let ada = open(&s.dispatcher, "Ada").await;
    let grace = open(&s.dispatcher, "Grace").await;
    s.dispatcher
        .dispatch(FreezeAccount::new(grace, "kyc review"), &ctx())
        .await
        .unwrap();

    let all = s
        .dispatcher
        .query(ListAccounts::default(), &ctx())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let frozen = s
        .dispatcher
        .query(
            ListAccounts {
                status: Some(AccountStatus::Frozen),
            },
            &ctx(),
        )
        .await
        .unwrap();
    assert_eq!(frozen.len(), 1);
    assert_eq!(frozen[0].account_id, grace);
    assert_eq!(frozen[0].freeze_reason.as_deref(), Some("kyc review"));

    let active = s.summary.list(Some(AccountStatus::Active)).await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].account_id, ada);
}

#[tokio::test]
async fn test_activity_limit_is_validated_by_pipeline() {
    let s = setup(PropagationConfig::All);
    let id = open(&s.dispatcher, "Ada").await;

    let result = s
        .dispatcher
        .query(GetAccountActivity { account_id: id, limit: 0 }, &ctx())
        .await;

    assert!(matches!(result, Err(DispatchError::Validation(_))));
}

#[tokio::test]
async fn test_rebuild_from_outbox_matches_inline_views() {
    let s = setup(PropagationConfig::All);
    let id = open(&s.dispatcher, "Ada").await;
    for amount in [100, 200, 300] {
        s.dispatcher
            .dispatch(DepositFunds::new(id, amount, "EUR"), &ctx())
            .await
            .unwrap();
    }
    let inline = s.summary.get(id).await.unwrap();

    let fresh = Arc::new(AccountSummaryView::new());
    let mut processor = ProjectionProcessor::new(s.store.clone());
    processor.register(fresh.clone());
    assert_eq!(processor.run_catch_up().await.unwrap(), 4);

    assert_eq!(fresh.get(id).await.unwrap(), inline);
    assert_eq!(fresh.get(id).await.unwrap().balance, 600);
}

#[tokio::test]
async fn test_catch_up_over_inline_views_is_idempotent() {
    let s = setup(PropagationConfig::All);
    let id = open(&s.dispatcher, "Ada").await;
    s.dispatcher
        .dispatch(DepositFunds::new(id, 50, "EUR"), &ctx())
        .await
        .unwrap();

    let mut processor = ProjectionProcessor::new(s.store.clone());
    processor.register(s.summary.clone());
    processor.register(s.activity.clone());
    processor.run_catch_up().await.unwrap();

    assert_eq!(s.summary.get(id).await.unwrap().balance, 50);
    assert_eq!(s.activity.history(id).await.len(), 2);
    assert_eq!(s.summary.position().await.events_skipped, 2);
}

/// Holds up deposits so a later commit can overtake them if delivery
/// order is not enforced.
struct StallDeposits(Arc<tokio::sync::Notify>);

#[async_trait::async_trait]
impl application::EventHandler for StallDeposits {
    fn name(&self) -> &'static str {
        "stall_deposits"
    }

    async fn handle(
        &self,
        event: &store::EventEnvelope,
    ) -> Result<(), application::HandlerError> {
        if event.event_type == AccountEvent::DEPOSITED {
            self.0.notify_one();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_summary_keeps_deposit_committed_before_concurrent_freeze() {
    let store = InMemoryStore::new();
    let summary = Arc::new(AccountSummaryView::new());
    let entered = Arc::new(tokio::sync::Notify::new());
    let events = EventDispatcher::default()
        .with_handler(Arc::new(StallDeposits(Arc::clone(&entered))))
        .with_handler(ProjectionHandler::shared(Arc::clone(&summary)));
    let dispatcher = Arc::new(
        register_account_handlers(Dispatcher::builder(store).event_dispatcher(events)).build(),
    );
    let id = open(&dispatcher, "Ada").await;

    let deposit = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            dispatcher
                .dispatch(DepositFunds::new(id, 500, "EUR"), &ctx())
                .await
        })
    };
    entered.notified().await;
    dispatcher
        .dispatch(FreezeAccount::new(id, "review"), &ctx())
        .await
        .unwrap();
    deposit.await.unwrap().unwrap();

    let view = summary.get(id).await.unwrap();
    assert_eq!(view.balance, 500);
    assert_eq!(view.status, AccountStatus::Frozen);
    assert_eq!(view.last_sequence, Version::new(3));
    assert_eq!(summary.position().await.events_skipped, 0);
}
