//! Benchmarks for key derivation, store operations and sweeps.
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dnstrail::dns::{DnsMessage, Question, RecordType};
use dnstrail::event::{EventSink, MonitorEvent};
use dnstrail::key::QueryKey;
use dnstrail::stats::Stats;
use dnstrail::store::CorrelationStore;
use dnstrail::sweep::{SweepConfig, Sweeper};

struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, event: MonitorEvent) {
        black_box(event);
    }
}

fn random_names(count: usize) -> Vec<String> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| format!("h{:08x}.cdn.example.com", rng.random::<u32>()))
        .collect()
}

fn query_payload() -> Vec<u8> {
    DnsMessage {
        id: 0x1234,
        flags: 0x0100,
        question: Question {
            name: "example.com".into(),
            qtype: RecordType::A,
            qclass: 1,
        },
    }
    .to_bytes()
}

fn bench_parse(c: &mut Criterion) {
    let query = query_payload();

    c.bench_function("parse_dns_query", |b| {
        b.iter(|| DnsMessage::parse(black_box(&query)))
    });
}

fn bench_derive(c: &mut Criterion) {
    let mut group = c.benchmark_group("derive");
    group.throughput(Throughput::Elements(1));

    for name in ["example.com", "a.very.long.subdomain.chain.of.labels.example.org"] {
        group.bench_function(BenchmarkId::new("derive", name.len()), |b| {
            b.iter(|| QueryKey::derive(black_box(name), black_box(1)))
        });
    }

    group.finish();
}

fn bench_record_resolve(c: &mut Criterion) {
    let names = random_names(1000);
    let keys: Vec<QueryKey> = names.iter().map(|n| QueryKey::derive(n, 1)).collect();
    let now = Instant::now();

    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("record_then_resolve_1000", |b| {
        let store = CorrelationStore::new();
        b.iter(|| {
            for (key, name) in keys.iter().zip(&names) {
                store.record_query(*key, name.clone(), now);
            }
            for key in &keys {
                black_box(store.try_resolve(*key));
            }
        })
    });

    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");

    // Sweep cost must not grow with the store.
    for size in [1_000usize, 100_000] {
        let store = Arc::new(CorrelationStore::new());
        let t0 = Instant::now();
        for (i, name) in random_names(size).into_iter().enumerate() {
            let recorded = t0 + Duration::from_nanos(i as u64);
            store.record_query(QueryKey::derive(&name, 1), name, recorded);
        }
        let sweeper = Sweeper::new(
            Arc::clone(&store),
            SweepConfig {
                stale_after: Duration::from_secs(3600),
                ..SweepConfig::default()
            },
            Arc::new(NullSink),
            Arc::new(Stats::new()),
        );

        group.bench_function(BenchmarkId::new("inspect_no_evict", size), |b| {
            b.iter(|| sweeper.sweep_at(black_box(t0)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_derive,
    bench_record_resolve,
    bench_sweep,
);

criterion_main!(benches);
