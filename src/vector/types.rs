//! Vector types and the filter/result shapes Semantic Index search uses.
//!
//! The `Vector` type and its similarity math are unchanged from a plain
//! embedding-vector library; what differs from a generic KV index is the
//! filter and result shapes, which are keyed by the Collective's
//! `vector_ref` addressing and memory metadata rather than a
//! namespace/key pair.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::types::{Category, ConfidenceSnapshot, Memory, Scope};

/// A vector embedding with metadata.
#[derive(Debug, Clone)]
pub struct Vector {
    /// The vector data (f32 for memory efficiency vs f64)
    data: Arc<[f32]>,
    /// The embedding model used to generate this vector
    model: String,
    /// Pre-computed magnitude for cosine similarity (cached)
    magnitude: Option<f32>,
}

impl Serialize for Vector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Vector", 3)?;
        state.serialize_field("data", &self.data.as_ref())?;
        state.serialize_field("model", &self.model)?;
        state.serialize_field("dimensions", &self.dimensions())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Vector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct VectorData {
            data: Vec<f32>,
            model: String,
        }

        let helper = VectorData::deserialize(deserializer)?;
        Ok(Vector::new(helper.data, helper.model))
    }
}

impl Vector {
    /// Create a new vector with the given data and model.
    ///
    /// # Panics
    /// Panics if `data` is empty.
    pub fn new(data: Vec<f32>, model: impl Into<String>) -> Self {
        assert!(!data.is_empty(), "Vector data cannot be empty");
        Self {
            data: Arc::from(data.into_boxed_slice()),
            model: model.into(),
            magnitude: None,
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn dimensions(&self) -> usize {
        self.data.len()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn magnitude_uncached(&self) -> f32 {
        self.magnitude
            .unwrap_or_else(|| self.data.iter().map(|&x| x * x).sum::<f32>().sqrt())
    }

    /// Cosine similarity, ranging -1.0 (opposite) to 1.0 (identical).
    /// `None` if dimensions mismatch.
    pub fn cosine_similarity(&self, other: &Vector) -> Option<f32> {
        if self.dimensions() != other.dimensions() {
            return None;
        }

        let dot_product: f32 = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum();

        let mag_a = self.magnitude_uncached();
        let mag_b = other.magnitude_uncached();

        if mag_a == 0.0 || mag_b == 0.0 {
            return Some(0.0);
        }

        Some(dot_product / (mag_a * mag_b))
    }

    pub fn euclidean_distance(&self, other: &Vector) -> Option<f32> {
        if self.dimensions() != other.dimensions() {
            return None;
        }

        let sum_sq_diff: f32 = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| {
                let diff = a - b;
                diff * diff
            })
            .sum();

        Some(sum_sq_diff.sqrt())
    }

    pub fn dot_product(&self, other: &Vector) -> Option<f32> {
        if self.dimensions() != other.dimensions() {
            return None;
        }

        Some(
            self.data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| a * b)
                .sum(),
        )
    }

    pub fn is_compatible_with(&self, other: &Vector) -> bool {
        self.dimensions() == other.dimensions()
    }
}

impl PartialEq for Vector {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.model == other.model
    }
}

impl Eq for Vector {}

impl Hash for Vector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for &value in self.data.iter() {
            value.to_bits().hash(state);
        }
        self.model.hash(state);
    }
}

impl PartialOrd for Vector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.dimensions() != other.dimensions() {
            return None;
        }
        self.data.partial_cmp(&other.data)
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vector(dims={}, model={})",
            self.dimensions(),
            self.model
        )
    }
}

/// Metadata stored alongside a vector so `search` can filter before
/// ranking, matching the Memory fields a filter may reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub category: Category,
    pub scope: Scope,
    pub machine_id: String,
    pub tags: Vec<String>,
    /// Unix millis the underlying memory was created at.
    pub created_at: i64,
}

/// Filter applied before top-k ranking in `search`. All fields are
/// conjunctive; `None`/empty means "no constraint on this field".
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub category: Option<Category>,
    pub scope: Option<Scope>,
    pub machine_id: Option<String>,
    pub tags_any: Vec<String>,
    pub tags_all: Vec<String>,
    /// Only entries created within this many milliseconds of `now`.
    pub age_within_ms: Option<i64>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn machine_id(mut self, machine_id: impl Into<String>) -> Self {
        self.machine_id = Some(machine_id.into());
        self
    }

    pub fn tags_any(mut self, tags: Vec<String>) -> Self {
        self.tags_any = tags;
        self
    }

    pub fn tags_all(mut self, tags: Vec<String>) -> Self {
        self.tags_all = tags;
        self
    }

    pub fn age_within_ms(mut self, ms: i64) -> Self {
        self.age_within_ms = Some(ms);
        self
    }

    /// Whether `meta` satisfies every constraint on this filter, given
    /// the current wall-clock time in millis.
    pub fn matches(&self, meta: &VectorMetadata, now_ms: i64) -> bool {
        if let Some(cat) = self.category {
            if meta.category != cat {
                return false;
            }
        }
        if let Some(scope) = self.scope {
            if meta.scope != scope {
                return false;
            }
        }
        if let Some(ref machine_id) = self.machine_id {
            if &meta.machine_id != machine_id {
                return false;
            }
        }
        if !self.tags_any.is_empty() && !self.tags_any.iter().any(|t| meta.tags.contains(t)) {
            return false;
        }
        if !self.tags_all.is_empty() && !self.tags_all.iter().all(|t| meta.tags.contains(t)) {
            return false;
        }
        if let Some(age_within_ms) = self.age_within_ms {
            if now_ms.saturating_sub(meta.created_at) > age_within_ms {
                return false;
            }
        }
        true
    }
}

/// A search hit: the opaque ref into S and its similarity score.
#[derive(Debug, Clone)]
pub struct VectorSearchResult {
    pub vector_ref: String,
    pub score: f32,
}

impl VectorSearchResult {
    pub fn new(vector_ref: impl Into<String>, score: f32) -> Self {
        Self {
            vector_ref: vector_ref.into(),
            score,
        }
    }
}

/// A search result resolved back to its memory, carrying both the raw
/// similarity score from S and the memory's own confidence snapshot (§4.2).
/// `min_confidence` filtering operates on `confidence.score`, not `score`.
#[derive(Debug, Clone)]
pub struct MemorySearchHit {
    pub memory: Memory,
    pub score: f32,
    pub confidence: ConfidenceSnapshot,
}

/// Options for a `search` call.
#[derive(Debug, Clone, Default)]
pub struct VectorSearchOptions {
    pub top_k: usize,
    pub threshold: f32,
    pub filter: SearchFilter,
}

impl VectorSearchOptions {
    pub fn new() -> Self {
        Self {
            top_k: 10,
            threshold: 0.0,
            filter: SearchFilter::new(),
        }
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn filter(mut self, filter: SearchFilter) -> Self {
        self.filter = filter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_creation() {
        let v = Vector::new(vec![1.0, 2.0, 3.0], "test-model");
        assert_eq!(v.dimensions(), 3);
        assert_eq!(v.model(), "test-model");
        assert_eq!(v.as_slice(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let v1 = Vector::new(vec![1.0, 0.0, 0.0], "test");
        let v2 = Vector::new(vec![1.0, 0.0, 0.0], "test");
        let sim = v1.cosine_similarity(&v2).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let v1 = Vector::new(vec![1.0, 0.0], "test");
        let v2 = Vector::new(vec![0.0, 1.0], "test");
        let sim = v1.cosine_similarity(&v2).unwrap();
        assert!((sim - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let v1 = Vector::new(vec![1.0, 0.0], "test");
        let v2 = Vector::new(vec![-1.0, 0.0], "test");
        let sim = v1.cosine_similarity(&v2).unwrap();
        assert!((sim - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_dims() {
        let v1 = Vector::new(vec![1.0, 0.0], "test");
        let v2 = Vector::new(vec![1.0, 0.0, 0.0], "test");
        assert!(v1.cosine_similarity(&v2).is_none());
    }

    #[test]
    fn test_euclidean_distance() {
        let v1 = Vector::new(vec![0.0, 0.0], "test");
        let v2 = Vector::new(vec![3.0, 4.0], "test");
        let dist = v1.euclidean_distance(&v2).unwrap();
        assert!((dist - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_dot_product() {
        let v1 = Vector::new(vec![1.0, 2.0, 3.0], "test");
        let v2 = Vector::new(vec![4.0, 5.0, 6.0], "test");
        let dot = v1.dot_product(&v2).unwrap();
        assert!((dot - 32.0).abs() < 1e-6);
    }

    #[test]
    fn test_vector_equality() {
        let v1 = Vector::new(vec![1.0, 2.0, 3.0], "test");
        let v2 = Vector::new(vec![1.0, 2.0, 3.0], "test");
        let v3 = Vector::new(vec![1.0, 2.0, 4.0], "test");
        assert_eq!(v1, v2);
        assert_ne!(v1, v3);
    }

    #[test]
    fn test_zero_vector() {
        let v1 = Vector::new(vec![1.0, 0.0], "test");
        let v2 = Vector::new(vec![0.0, 0.0], "test");
        let sim = v1.cosine_similarity(&v2).unwrap();
        assert_eq!(sim, 0.0);
    }

    fn meta(category: Category, scope: Scope, machine_id: &str, tags: &[&str], created_at: i64) -> VectorMetadata {
        VectorMetadata {
            category,
            scope,
            machine_id: machine_id.to_string(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            created_at,
        }
    }

    #[test]
    fn filter_matches_all_constraints() {
        let m = meta(Category::Incidents, Scope::Collective, "m1", &["db", "prod"], 1_000);
        let filter = SearchFilter::new()
            .category(Category::Incidents)
            .scope(Scope::Collective)
            .machine_id("m1")
            .tags_all(vec!["db".into()]);
        assert!(filter.matches(&m, 1_000));

        let filter_wrong_machine = SearchFilter::new().machine_id("m2");
        assert!(!filter_wrong_machine.matches(&m, 1_000));
    }

    #[test]
    fn filter_tags_any_requires_at_least_one_match() {
        let m = meta(Category::Global, Scope::Collective, "m1", &["a"], 0);
        let filter = SearchFilter::new().tags_any(vec!["b".into(), "a".into()]);
        assert!(filter.matches(&m, 0));
        let filter_none = SearchFilter::new().tags_any(vec!["x".into()]);
        assert!(!filter_none.matches(&m, 0));
    }

    #[test]
    fn filter_age_within_excludes_stale_entries() {
        let m = meta(Category::Global, Scope::Collective, "m1", &[], 0);
        let filter = SearchFilter::new().age_within_ms(1_000);
        assert!(filter.matches(&m, 500));
        assert!(!filter.matches(&m, 2_000));
    }
}
