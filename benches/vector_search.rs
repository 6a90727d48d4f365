//! Benchmarks for the Semantic Index (S): upsert and filtered
//! similarity search over a growing flat index.
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use collective_core::types::{Category, Scope};
use collective_core::vector::{SearchFilter, SemanticIndex, Vector, VectorMetadata};

fn random_vector(dimensions: usize) -> Vector {
    let data: Vec<f32> = (0..dimensions).map(|_| rand::random::<f32>() * 2.0 - 1.0).collect();
    Vector::new(data, "bench-model".to_string())
}

fn populated_index(n: usize, dimensions: usize) -> SemanticIndex {
    let embedder = Arc::new(collective_core::vector::NullEmbedder {
        dimensions,
        model: "bench-model".to_string(),
    });
    let index = SemanticIndex::with_flat_index(embedder);
    for i in 0..n {
        index.upsert(
            format!("mem-{i}"),
            random_vector(dimensions),
            VectorMetadata {
                category: Category::Global,
                scope: Scope::Collective,
                machine_id: "bench-machine".to_string(),
                tags: vec![],
                created_at: i as i64,
            },
        );
    }
    index
}

fn bench_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_upsert");

    for size in [1000, 5000, 10000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| black_box(populated_index(size, 128)));
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_search");

    for size in [1000, 5000, 10000] {
        let index = populated_index(size, 128);
        let query = random_vector(128);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(index.search(&query, SearchFilter::new(), 10)));
        });
    }
    group.finish();
}

fn bench_search_filtered(c: &mut Criterion) {
    let index = populated_index(10_000, 128);
    let query = random_vector(128);
    let filter = SearchFilter::new().category(Category::Global).scope(Scope::Collective);

    c.bench_function("vector_search_filtered_10k", |b| {
        b.iter(|| black_box(index.search(&query, filter.clone(), 10)));
    });
}

criterion_group!(benches, bench_upsert, bench_search, bench_search_filtered);
criterion_main!(benches);
