use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use store::{
    AggregateRecord, EventEnvelope, InMemoryStore, OutboxReader, Repository, Transaction,
    UnitOfWork, Version,
};

fn make_record(aggregate_id: AggregateId, version: i64) -> AggregateRecord {
    AggregateRecord::new(
        aggregate_id,
        "Account",
        Version::new(version),
        serde_json::json!({
            "id": aggregate_id.to_string(),
            "balance": {"minor_units": version * 100, "currency": "EUR"}
        }),
    )
}

fn make_message(aggregate_id: AggregateId, sequence: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Account")
        .event_type("FundsDeposited")
        .sequence(Version::new(sequence))
        .payload_raw(serde_json::json!({
            "type": "FundsDeposited",
            "data": {"amount": {"minor_units": 100, "currency": "EUR"}}
        }))
        .build()
        .unwrap()
}

fn bench_commit_new_aggregate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/commit_new_aggregate", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                let id = AggregateId::new();
                let mut tx = store.begin().await.unwrap();
                tx.save(make_record(id, 1), Version::initial())
                    .await
                    .unwrap();
                tx.append_outbox(vec![make_message(id, 1)]).await.unwrap();
                tx.commit().await.unwrap();
            });
        });
    });
}

fn bench_commit_sequential_updates(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/commit_100_sequential_updates", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                let id = AggregateId::new();
                for v in 1..=100 {
                    let mut tx = store.begin().await.unwrap();
                    tx.save(make_record(id, v), Version::new(v - 1))
                        .await
                        .unwrap();
                    tx.append_outbox(vec![make_message(id, v)]).await.unwrap();
                    tx.commit().await.unwrap();
                }
            });
        });
    });
}

fn bench_load(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let id = AggregateId::new();
    rt.block_on(async {
        let mut tx = store.begin().await.unwrap();
        tx.save(make_record(id, 1), Version::initial())
            .await
            .unwrap();
        tx.commit().await.unwrap();
    });

    c.bench_function("store/load", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.load(id).await.unwrap();
            });
        });
    });
}

fn bench_drain_outbox(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/drain_outbox_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                let id = AggregateId::new();
                let mut tx = store.begin().await.unwrap();
                tx.save(make_record(id, 1000), Version::initial())
                    .await
                    .unwrap();
                tx.append_outbox((1..=1000).map(|s| make_message(id, s)).collect())
                    .await
                    .unwrap();
                tx.commit().await.unwrap();

                loop {
                    let batch = store.pending(100).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    let positions: Vec<i64> = batch.iter().map(|e| e.position).collect();
                    store.mark_published(&positions).await.unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_commit_new_aggregate,
    bench_commit_sequential_updates,
    bench_load,
    bench_drain_outbox
);
criterion_main!(benches);
