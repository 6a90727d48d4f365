//! Benchmarks for the Memory Store (M): write throughput and lookup
//! latency as the ring/log grow.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use tokio::runtime::Runtime;

use collective_core::config::ConfidenceWeights;
use collective_core::identity::{LamportClock, MachineId};
use collective_core::memory::MemoryStore;
use collective_core::types::{Category, Importance, Scope};

fn open_store() -> (TempDir, MemoryStore) {
    let dir = TempDir::new().unwrap();
    let machine_id = MachineId("bench-machine".into());
    let clock = Arc::new(LamportClock::new(machine_id.clone()));
    let (store, _change_rx) = MemoryStore::open(
        dir.path(),
        machine_id,
        clock,
        None,
        ConfidenceWeights::default(),
        Duration::from_secs(3600),
        1024,
    )
    .unwrap();
    (dir, store)
}

fn bench_store_single(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (_dir, store) = open_store();

    c.bench_function("memory_store_single", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                store
                    .store(
                        "a benchmark memory".to_string(),
                        Category::Global,
                        HashSet::new(),
                        Scope::MachineLocal,
                        Importance::Normal,
                        "bench-agent".to_string(),
                    )
                    .await
                    .unwrap(),
            )
        })
    });
}

fn bench_store_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_store_sequential");
    let rt = Runtime::new().unwrap();

    for size in [10, 100, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async {
                let (_dir, store) = open_store();
                for i in 0..size {
                    store
                        .store(
                            format!("memory number {i}"),
                            Category::Global,
                            HashSet::new(),
                            Scope::MachineLocal,
                            Importance::Normal,
                            "bench-agent".to_string(),
                        )
                        .await
                        .unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_get_from_dataset(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_get_from_dataset");
    let rt = Runtime::new().unwrap();

    for dataset_size in [100, 1000, 10000] {
        let (_dir, store) = open_store();
        let ids: Vec<String> = rt.block_on(async {
            let mut ids = Vec::with_capacity(dataset_size);
            for i in 0..dataset_size {
                let (id, _version) = store
                    .store(
                        format!("memory number {i}"),
                        Category::Global,
                        HashSet::new(),
                        Scope::MachineLocal,
                        Importance::Normal,
                        "bench-agent".to_string(),
                    )
                    .await
                    .unwrap();
                ids.push(id);
            }
            ids
        });
        let probe = ids[dataset_size / 2].clone();

        group.bench_with_input(BenchmarkId::from_parameter(dataset_size), &probe, |b, id| {
            b.iter(|| black_box(store.get(id, false).unwrap()));
        });
    }
    group.finish();
}

fn configure_criterion() -> Criterion {
    Criterion::default()
        .warm_up_time(Duration::from_secs(1))
        .measurement_time(Duration::from_secs(3))
        .sample_size(50)
}

criterion_group! {
    name = benches;
    config = configure_criterion();
    targets = bench_store_single, bench_store_sequential, bench_get_from_dataset
}

criterion_main!(benches);
