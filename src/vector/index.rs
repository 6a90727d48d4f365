//! Flat (brute-force) vector indexing.
//!
//! Optimized for small to medium datasets (up to ~100K vectors). Exact
//! k-NN search by comparing the query against every indexed vector.
//! See [`super::hnsw`] for the approximate, graph-based alternative
//! behind the same [`AnnIndex`] trait.

use super::types::{SearchFilter, Vector, VectorMetadata, VectorSearchOptions, VectorSearchResult};
use dashmap::DashMap;
use std::sync::Arc;

/// Abstracts over indexing strategies (flat, HNSW, ...) so S can swap
/// implementations based on dataset size and latency needs without
/// changing its own contract.
pub trait AnnIndex: Send + Sync {
    /// Insert or replace the vector at `vector_ref`. Idempotent.
    fn upsert(&self, vector_ref: String, vector: Vector, metadata: VectorMetadata);

    /// Remove `vector_ref`. Idempotent; unknown ref is a no-op.
    fn remove(&self, vector_ref: &str);

    /// Rank indexed vectors against `query`, filtering by `opts.filter`
    /// before ranking and truncating to `opts.top_k`.
    fn search(&self, query: &Vector, opts: &VectorSearchOptions) -> Vec<VectorSearchResult>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool;

    fn clear(&self);
}

/// A flat (brute-force) vector index: `vector_ref -> (Vector, VectorMetadata)`.
#[derive(Debug, Default)]
pub struct FlatIndex {
    entries: DashMap<String, (Vector, VectorMetadata)>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl AnnIndex for FlatIndex {
    fn upsert(&self, vector_ref: String, vector: Vector, metadata: VectorMetadata) {
        self.entries.insert(vector_ref, (vector, metadata));
    }

    fn remove(&self, vector_ref: &str) {
        self.entries.remove(vector_ref);
    }

    fn search(&self, query: &Vector, opts: &VectorSearchOptions) -> Vec<VectorSearchResult> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut results: Vec<VectorSearchResult> = self
            .entries
            .iter()
            .filter(|entry| {
                let (_, meta) = entry.value();
                opts.filter.matches(meta, now_ms)
            })
            .filter_map(|entry| {
                let (vector_ref, (vector, _)) = entry.pair();
                if !query.is_compatible_with(vector) {
                    return None;
                }
                let score = query.cosine_similarity(vector)?;
                (score >= opts.threshold).then(|| VectorSearchResult::new(vector_ref.clone(), score))
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(opts.top_k.max(1));
        results
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// A thread-safe, cloneable handle to an ANN index backend.
#[derive(Clone)]
pub struct VectorIndex {
    inner: Arc<dyn AnnIndex>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("len", &self.len())
            .field("is_empty", &self.is_empty())
            .finish()
    }
}

impl VectorIndex {
    pub fn new_flat() -> Self {
        Self {
            inner: Arc::new(FlatIndex::new()),
        }
    }

    pub fn new_hnsw(config: super::hnsw::HnswConfig) -> Self {
        Self {
            inner: Arc::new(super::hnsw::HnswIndex::new(config)),
        }
    }

    pub fn upsert(&self, vector_ref: String, vector: Vector, metadata: VectorMetadata) {
        self.inner.upsert(vector_ref, vector, metadata);
    }

    pub fn remove(&self, vector_ref: &str) {
        self.inner.remove(vector_ref);
    }

    pub fn search(&self, query: &Vector, opts: &VectorSearchOptions) -> Vec<VectorSearchResult> {
        self.inner.search(query, opts)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new_flat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Scope};

    fn meta() -> VectorMetadata {
        VectorMetadata {
            category: Category::Global,
            scope: Scope::Collective,
            machine_id: "m1".into(),
            tags: vec![],
            created_at: 0,
        }
    }

    #[test]
    fn flat_index_add_and_search() {
        let index = FlatIndex::new();

        let v1 = Vector::new(vec![1.0, 0.0, 0.0], "test");
        let v2 = Vector::new(vec![0.0, 1.0, 0.0], "test");
        let v3 = Vector::new(vec![0.0, 0.0, 1.0], "test");

        index.upsert("doc1".into(), v1, meta());
        index.upsert("doc2".into(), v2, meta());
        index.upsert("doc3".into(), v3, meta());

        let query = Vector::new(vec![0.9, 0.1, 0.0], "test");
        let opts = VectorSearchOptions::new().top_k(2);
        let results = index.search(&query, &opts);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].vector_ref, "doc1");
        assert!(results[0].score > 0.9);
    }

    #[test]
    fn flat_index_threshold() {
        let index = FlatIndex::new();
        index.upsert("doc1".into(), Vector::new(vec![1.0, 0.0], "test"), meta());
        index.upsert("doc2".into(), Vector::new(vec![0.0, 1.0], "test"), meta());

        let query = Vector::new(vec![1.0, 0.0], "test");
        let opts = VectorSearchOptions::new().top_k(10).threshold(0.9);
        let results = index.search(&query, &opts);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].vector_ref, "doc1");
    }

    #[test]
    fn flat_index_category_filter() {
        let index = FlatIndex::new();
        let mut incident_meta = meta();
        incident_meta.category = Category::Incidents;

        index.upsert("doc1".into(), Vector::new(vec![1.0, 0.0], "test"), incident_meta);
        index.upsert("doc2".into(), Vector::new(vec![0.0, 1.0], "test"), meta());

        let query = Vector::new(vec![1.0, 0.0], "test");
        let opts = VectorSearchOptions::new()
            .top_k(10)
            .filter(SearchFilter::new().category(Category::Incidents));
        let results = index.search(&query, &opts);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].vector_ref, "doc1");
    }

    #[test]
    fn flat_index_remove() {
        let index = FlatIndex::new();
        index.upsert("doc1".into(), Vector::new(vec![1.0, 0.0], "test"), meta());
        assert_eq!(index.len(), 1);

        index.remove("doc1");
        assert_eq!(index.len(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn flat_index_remove_is_idempotent_on_unknown_ref() {
        let index = FlatIndex::new();
        index.remove("never-added");
        assert!(index.is_empty());
    }

    #[test]
    fn flat_index_mismatched_dims_are_skipped() {
        let index = FlatIndex::new();
        index.upsert("doc1".into(), Vector::new(vec![1.0, 0.0], "test"), meta());

        let query = Vector::new(vec![1.0, 0.0, 0.0], "test");
        let results = index.search(&query, &VectorSearchOptions::new());
        assert!(results.is_empty());
    }

    #[test]
    fn vector_index_wrapper_shares_state_across_clones() {
        let index = VectorIndex::new_flat();
        index.upsert("doc1".into(), Vector::new(vec![1.0, 0.0], "test"), meta());

        let cloned = index.clone();
        assert_eq!(cloned.len(), 1);

        cloned.remove("doc1");
        assert_eq!(index.len(), 0);
    }
}
