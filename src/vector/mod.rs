//! Semantic Index (S): an adapter that turns M's memories into an
//! opaque vector similarity store.
//!
//! The embedding model itself is out of scope (§1 Non-goals); S only
//! owns the contract around it: embed, upsert, remove, search. The
//! index backend (flat or HNSW) is swappable behind [`index::AnnIndex`]
//! without either M or the embedding trait noticing.

mod hnsw;
mod index;
mod types;

pub use hnsw::{HnswConfig, HnswIndex};
pub use index::{AnnIndex, FlatIndex, VectorIndex};
pub use types::{MemorySearchHit, SearchFilter, Vector, VectorMetadata, VectorSearchOptions, VectorSearchResult};

use async_trait::async_trait;

use crate::error::CollectiveResult;

/// Injected embedding function. Deployments plug in whatever model they
/// like; S only needs a stable dimensionality per deployment.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> CollectiveResult<Vector>;
}

/// A no-op embedder for tests and deployments that only store
/// pre-computed vectors via `upsert`.
pub struct NullEmbedder {
    pub dimensions: usize,
    pub model: String,
}

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, text: &str) -> CollectiveResult<Vector> {
        // Deterministic placeholder: hashes `text` into a fixed-width
        // vector so search is exercisable without a real model wired in.
        let mut data = vec![0.0f32; self.dimensions];
        for (i, byte) in text.bytes().enumerate() {
            data[i % self.dimensions] += byte as f32;
        }
        Ok(Vector::new(data, self.model.clone()))
    }
}

/// The Semantic Index component: embeds text, keeps a vector index in
/// sync with M, and serves filtered similarity search.
pub struct SemanticIndex {
    embedder: std::sync::Arc<dyn Embedder>,
    index: VectorIndex,
}

impl SemanticIndex {
    pub fn new(embedder: std::sync::Arc<dyn Embedder>, index: VectorIndex) -> Self {
        Self { embedder, index }
    }

    pub fn with_flat_index(embedder: std::sync::Arc<dyn Embedder>) -> Self {
        Self::new(embedder, VectorIndex::new_flat())
    }

    pub fn with_hnsw_index(embedder: std::sync::Arc<dyn Embedder>, config: HnswConfig) -> Self {
        Self::new(embedder, VectorIndex::new_hnsw(config))
    }

    /// Produce an embedding for `text` without touching the index.
    pub async fn embed(&self, text: &str) -> CollectiveResult<Vector> {
        self.embedder.embed(text).await
    }

    /// Idempotently insert or replace the vector at `vector_ref`.
    pub fn upsert(&self, vector_ref: String, vector: Vector, metadata: VectorMetadata) {
        self.index.upsert(vector_ref, vector, metadata);
    }

    /// Idempotently remove `vector_ref`; unknown refs are a no-op. Used
    /// by M's `soft_delete` (and, for good, by `purge`).
    pub fn remove(&self, vector_ref: &str) {
        self.index.remove(vector_ref);
    }

    /// Rank indexed vectors by similarity to `query_vector`, restricted
    /// to `filter`, returning at most `k` hits sorted by descending
    /// score. Never returns entries removed by a prior `remove`.
    pub fn search(&self, query_vector: &Vector, filter: SearchFilter, k: usize) -> Vec<VectorSearchResult> {
        let opts = VectorSearchOptions::new().top_k(k).filter(filter);
        self.index.search(query_vector, &opts)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
