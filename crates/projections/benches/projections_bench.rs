use std::sync::Arc;

use common::{AggregateId, Version};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    AccountEvent, AccountHolder, AccountOpenedData, Currency, DomainEvent, FundsMovedData, Money,
};
use projections::{AccountSummaryView, Projection, ProjectionProcessor};
use store::{AggregateRecord, EventEnvelope, InMemoryStore, Transaction, UnitOfWork};

fn make_envelope(account_id: AggregateId, sequence: i64, event: &AccountEvent) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(account_id)
        .aggregate_type("Account")
        .event_type(DomainEvent::event_type(event))
        .sequence(Version::new(sequence))
        .payload(event)
        .unwrap()
        .build()
        .unwrap()
}

fn eur(minor_units: i64) -> Money {
    Money::new(minor_units, Currency::new("EUR").unwrap()).unwrap()
}

/// Commits N accounts, each with 3 outbox entries (opened + two deposits).
async fn populate_store(store: &InMemoryStore, n: usize) {
    for _ in 0..n {
        let id = AggregateId::new();
        let opened = AccountEvent::AccountOpened(AccountOpenedData {
            holder: AccountHolder::new("Bench Holder").unwrap(),
            currency: Currency::new("EUR").unwrap(),
        });
        let first = AccountEvent::FundsDeposited(FundsMovedData {
            amount: eur(100),
            balance: eur(100),
        });
        let second = AccountEvent::FundsDeposited(FundsMovedData {
            amount: eur(100),
            balance: eur(200),
        });

        let mut tx = store.begin().await.unwrap();
        tx.save(
            AggregateRecord::new(id, "Account", Version::new(3), serde_json::json!({})),
            Version::initial(),
        )
        .await
        .unwrap();
        tx.append_outbox(vec![
            make_envelope(id, 1, &opened),
            make_envelope(id, 2, &first),
            make_envelope(id, 3, &second),
        ])
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }
}

fn bench_catch_up(c: &mut Criterion, accounts: usize) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    rt.block_on(populate_store(&store, accounts));

    c.bench_function(&format!("projections/catch_up_{}_events", accounts * 3), |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut processor = ProjectionProcessor::new(store.clone());
                processor.register(Arc::new(AccountSummaryView::new()));
                processor.run_catch_up().await.unwrap();
            });
        });
    });
}

fn bench_catch_up_100_accounts(c: &mut Criterion) {
    bench_catch_up(c, 100);
}

fn bench_catch_up_1000_accounts(c: &mut Criterion) {
    bench_catch_up(c, 1000);
}

fn bench_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let view = AccountSummaryView::new();
    let id = AggregateId::new();
    let opened = AccountEvent::AccountOpened(AccountOpenedData {
        holder: AccountHolder::new("Bench Holder").unwrap(),
        currency: Currency::new("EUR").unwrap(),
    });
    rt.block_on(view.handle(&make_envelope(id, 1, &opened))).unwrap();
    let mut sequence = 1;

    c.bench_function("projections/summary_single_deposit", |b| {
        b.iter(|| {
            sequence += 1;
            let event = AccountEvent::FundsDeposited(FundsMovedData {
                amount: eur(1),
                balance: eur(sequence - 1),
            });
            rt.block_on(view.handle(&make_envelope(id, sequence, &event)))
                .unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_catch_up_100_accounts,
    bench_catch_up_1000_accounts,
    bench_single_event
);
criterion_main!(benches);
