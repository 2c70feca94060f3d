//! # Commerce Events Benchmarks
//!
//! | Component | Operation |
//! |-----------|-----------|
//! | shared-bus | topic pattern matching |
//! | shared-bus | in-memory publish through a topic exchange |
//! | ec-04 | search key hashing |
//! | ec-04 | keyset page selection |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ec_04_cache_aside::{query_key, KeysetQuery, SortDirection, PRODUCT_SEARCH_NAMESPACE};
use shared_bus::routing::topic_matches;
use shared_bus::{Broker, InMemoryBroker, PublishOptions, TopologyRegistrar};
use shared_types::{Binding, ExchangeKind, MessageEnvelope};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// ROUTING
// ============================================================================

fn bench_topic_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing");

    let cases = [
        ("payment.#", "payment.created"),
        ("payment.#", "payment.error.retry"),
        ("*.created", "order.created"),
        ("cart.*.line.#", "cart.c-1.line.p-9.quantity"),
    ];
    for (pattern, key) in cases {
        group.bench_with_input(
            BenchmarkId::new("topic_matches", format!("{pattern} ~ {key}")),
            &(pattern, key),
            |b, (pattern, key)| b.iter(|| black_box(topic_matches(pattern, key))),
        );
    }
    group.finish();
}

fn bench_memory_publish(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let broker = InMemoryBroker::new();
    runtime.block_on(async {
        let registrar = TopologyRegistrar::new(Arc::new(broker.clone()));
        registrar
            .declare_exchange("payment-service", ExchangeKind::Topic, true)
            .await
            .expect("declare exchange");
        registrar
            .declare_queue("payments", true, &[Binding::new("payment-service", "payment.#")])
            .await
            .expect("declare queue");
    });

    let mut group = c.benchmark_group("broker");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));
    group.bench_function("memory_publish", |b| {
        b.iter(|| {
            runtime
                .block_on(broker.publish(
                    "payment-service",
                    "payment.created",
                    MessageEnvelope::new(b"{}".to_vec()),
                    PublishOptions::default(),
                ))
                .expect("publish");
        });
        broker.purge("payments").expect("purge");
    });
    group.finish();
}

// ============================================================================
// CACHE KEYS AND PAGING
// ============================================================================

fn bench_query_key(c: &mut Criterion) {
    let params = serde_json::json!({
        "search": "desk lamp",
        "category": "lighting",
        "price": {"min": 1_000, "max": 5_000},
        "sort": "-price",
        "limit": 20,
        "cursor": null,
    });
    c.bench_function("query_key", |b| {
        b.iter(|| black_box(query_key(PRODUCT_SEARCH_NAMESPACE, &params)))
    });
}

fn bench_keyset_page(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyset");
    for size in [100usize, 1_000, 10_000] {
        let records: Vec<(u64, String)> = (0..size)
            .map(|i| ((i as u64 * 7919) % 5_000, format!("p-{i}")))
            .collect();
        let query = KeysetQuery::<u64>::new(SortDirection::Descending, 20);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("first_page", size), &records, |b, records| {
            b.iter(|| {
                black_box(query.apply(records, |(price, id)| (*price, id.clone())))
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_topic_matching,
    bench_memory_publish,
    bench_query_key,
    bench_keyset_page
);
criterion_main!(benches);
