//! HNSW (Hierarchical Navigable Small World) index for approximate
//! nearest neighbor search.
//!
//! Graph-based ANN with O(log n) search and high recall, offered behind
//! the same [`super::index::AnnIndex`] trait as the flat index so a
//! deployment can trade recall for latency without touching the Memory
//! Store or Sync Engine.

use super::index::AnnIndex;
use super::types::{Vector, VectorMetadata, VectorSearchOptions, VectorSearchResult};
use dashmap::DashMap;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::RwLock;

/// Configuration for an [`HnswIndex`].
#[derive(Debug, Clone, Copy)]
pub struct HnswConfig {
    /// Maximum connections per node per layer (default: 16).
    pub m: usize,
    /// Candidate list size during construction (default: 200).
    pub ef_construction: usize,
    /// Candidate list size during search (default: 50).
    pub ef_search: usize,
    /// Layer-assignment probability decay, default `1 / ln(m)`.
    pub m_l: f64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        let m = 16;
        Self {
            m,
            ef_construction: 200,
            ef_search: 50,
            m_l: 1.0 / (m as f64).ln(),
        }
    }
}

impl HnswConfig {
    pub fn with_m(m: usize) -> Self {
        Self {
            m,
            ..Self::default()
        }
    }

    pub fn ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    pub fn ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    vector: Vector,
    metadata: VectorMetadata,
    max_layer: usize,
}

#[derive(Debug, Default)]
struct Layer {
    edges: HashMap<String, Vec<String>>,
}

impl Layer {
    fn add_edge(&mut self, from: &str, to: &str) {
        self.edges.entry(from.to_string()).or_default().push(to.to_string());
    }

    fn get_neighbors(&self, node_id: &str) -> &[String] {
        self.edges.get(node_id).map_or(&[], |v| v.as_slice())
    }
}

/// HNSW-backed [`AnnIndex`] implementation.
pub struct HnswIndex {
    config: HnswConfig,
    nodes: DashMap<String, Node>,
    layers: Vec<RwLock<Layer>>,
    entry_point: RwLock<Option<String>>,
    max_layer: std::sync::atomic::AtomicUsize,
    rng: std::sync::Mutex<StdRng>,
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("config", &self.config)
            .field("num_nodes", &self.nodes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    distance: f32,
    id: String,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.distance.partial_cmp(&self.distance).unwrap_or(std::cmp::Ordering::Equal)
    }
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Self {
        let max_layers = 16;
        let layers = (0..max_layers).map(|_| RwLock::new(Layer::default())).collect();

        Self {
            config,
            nodes: DashMap::new(),
            layers,
            entry_point: RwLock::new(None),
            max_layer: std::sync::atomic::AtomicUsize::new(0),
            rng: std::sync::Mutex::new(StdRng::seed_from_u64(42)),
        }
    }

    fn random_layer(&self) -> usize {
        let mut rng = self.rng.lock().unwrap();
        let uniform = Uniform::from(0.0..1.0);
        let mut level = 0;
        loop {
            let r: f64 = uniform.sample(&mut *rng);
            if r < (-(level as f64) * self.config.m_l).exp() {
                level += 1;
            } else {
                break;
            }
        }
        level
    }

    fn distance(&self, a: &Vector, b: &Vector) -> f32 {
        a.cosine_similarity(b).map(|s| 1.0 - s).unwrap_or(f32::MAX)
    }

    fn insert(&self, id: String, vector: Vector, metadata: VectorMetadata) {
        if self.nodes.contains_key(&id) {
            self.remove_node(&id);
        }

        let layer = self.random_layer();
        let node = Node {
            vector: vector.clone(),
            metadata,
            max_layer: layer,
        };
        self.nodes.insert(id.clone(), node);

        let current_max = self.max_layer.load(std::sync::atomic::Ordering::Relaxed);
        if layer > current_max {
            self.max_layer.store(layer, std::sync::atomic::Ordering::Relaxed);
            *self.entry_point.write().unwrap() = Some(id.clone());
        }

        let entry_point = self.entry_point.read().unwrap().clone();
        if entry_point.is_none() || entry_point.as_deref() == Some(id.as_str()) {
            return;
        }

        let mut curr_ep = entry_point.unwrap();
        let curr_node = self.nodes.get(&curr_ep).unwrap();
        let mut curr_dist = self.distance(&curr_node.vector, &vector);
        let curr_max_layer = curr_node.max_layer;
        drop(curr_node);

        for lc in ((layer + 1)..=curr_max_layer).rev() {
            let (new_ep, new_dist) = self.search_layer_greedy(&curr_ep, &vector, lc);
            if new_dist < curr_dist {
                curr_ep = new_ep;
                curr_dist = new_dist;
            }
        }

        let min_layer = layer.min(curr_max_layer);
        for lc in (0..=min_layer).rev() {
            let neighbors = self.search_layer(&curr_ep, &vector, self.config.ef_construction, lc);
            let selected: Vec<String> = neighbors.into_iter().take(self.config.m).map(|(nid, _)| nid).collect();

            for neighbor_id in &selected {
                self.add_edge(lc, &id, neighbor_id);
                self.add_edge(lc, neighbor_id, &id);
                self.prune_connections(lc, neighbor_id);
            }
        }
    }

    fn search_layer_greedy(&self, entry_point: &str, query: &Vector, layer: usize) -> (String, f32) {
        let candidates = self.search_layer(entry_point, query, 1, layer);
        candidates
            .into_iter()
            .next()
            .unwrap_or_else(|| (entry_point.to_string(), f32::MAX))
    }

    fn search_layer(&self, entry_point: &str, query: &Vector, ef: usize, layer: usize) -> Vec<(String, f32)> {
        let mut visited = HashSet::new();
        let mut candidates = BinaryHeap::new();
        let mut best = BinaryHeap::new();

        let entry_node = match self.nodes.get(entry_point) {
            Some(n) => n,
            None => return Vec::new(),
        };

        let entry_dist = self.distance(&entry_node.vector, query);
        drop(entry_node);
        visited.insert(entry_point.to_string());
        candidates.push(Candidate { distance: entry_dist, id: entry_point.to_string() });
        best.push(Candidate { distance: -entry_dist, id: entry_point.to_string() });

        while let Some(curr) = candidates.pop() {
            let worst_best = best.peek().map(|c: &Candidate| -c.distance).unwrap_or(f32::MAX);
            if curr.distance > worst_best {
                break;
            }

            let neighbors: Vec<String> = {
                let layer_guard = self.layers[layer].read().unwrap();
                layer_guard.get_neighbors(&curr.id).to_vec()
            };

            for neighbor_id in neighbors {
                if visited.contains(&neighbor_id) {
                    continue;
                }
                visited.insert(neighbor_id.clone());

                if let Some(neighbor_node) = self.nodes.get(&neighbor_id) {
                    let dist = self.distance(&neighbor_node.vector, query);
                    if dist < worst_best || best.len() < ef {
                        candidates.push(Candidate { distance: dist, id: neighbor_id.clone() });
                        best.push(Candidate { distance: -dist, id: neighbor_id });
                        if best.len() > ef {
                            best.pop();
                        }
                    }
                }
            }
        }

        best.into_iter().map(|c| (c.id, -c.distance)).collect()
    }

    fn add_edge(&self, layer: usize, from: &str, to: &str) {
        if let Ok(mut layer_guard) = self.layers[layer].write() {
            layer_guard.add_edge(from, to);
        }
    }

    fn prune_connections(&self, layer: usize, node_id: &str) {
        let max_connections = self.config.m * 2;
        let neighbors: Vec<String> = {
            let layer_guard = self.layers[layer].read().unwrap();
            layer_guard.get_neighbors(node_id).to_vec()
        };

        if neighbors.len() <= max_connections {
            return;
        }

        let node = match self.nodes.get(node_id) {
            Some(n) => n,
            None => return,
        };

        let mut neighbor_dists: Vec<(String, f32)> = neighbors
            .iter()
            .filter_map(|nid| self.nodes.get(nid).map(|n| (nid.clone(), self.distance(&node.vector, &n.vector))))
            .collect();
        drop(node);

        neighbor_dists.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        neighbor_dists.truncate(max_connections);

        if let Ok(mut layer_guard) = self.layers[layer].write() {
            let new_edges: Vec<String> = neighbor_dists.into_iter().map(|(id, _)| id).collect();
            layer_guard.edges.insert(node_id.to_string(), new_edges);
        }
    }

    fn remove_node(&self, id: &str) {
        let needs_ep_update = {
            let ep_guard = self.entry_point.read().unwrap();
            ep_guard.as_deref() == Some(id)
        };

        if let Some((_, node)) = self.nodes.remove(id) {
            for layer in 0..=node.max_layer {
                if let Ok(mut layer_guard) = self.layers[layer].write() {
                    layer_guard.edges.remove(id);
                    for neighbors in layer_guard.edges.values_mut() {
                        neighbors.retain(|n| n != id);
                    }
                }
            }
        }

        if needs_ep_update {
            let mut max_layer = 0;
            let mut new_ep = None;
            for entry in self.nodes.iter() {
                if entry.value().max_layer >= max_layer {
                    max_layer = entry.value().max_layer;
                    new_ep = Some(entry.key().clone());
                }
            }
            *self.entry_point.write().unwrap() = new_ep;
            self.max_layer.store(max_layer, std::sync::atomic::Ordering::Relaxed);
        }
    }
}

impl AnnIndex for HnswIndex {
    fn upsert(&self, vector_ref: String, vector: Vector, metadata: VectorMetadata) {
        self.insert(vector_ref, vector, metadata);
    }

    fn remove(&self, vector_ref: &str) {
        self.remove_node(vector_ref);
    }

    fn search(&self, query: &Vector, opts: &VectorSearchOptions) -> Vec<VectorSearchResult> {
        if self.nodes.is_empty() {
            return Vec::new();
        }

        let entry_point = match self.entry_point.read().unwrap().clone() {
            Some(ep) => ep,
            None => return Vec::new(),
        };

        let ef = opts.top_k.max(self.config.ef_search);
        let max_layer = self.max_layer.load(std::sync::atomic::Ordering::Relaxed);

        let entry_node = match self.nodes.get(&entry_point) {
            Some(n) => n,
            None => return Vec::new(),
        };

        let mut curr_ep = entry_point;
        let mut curr_dist = self.distance(&entry_node.vector, query);
        let entry_max_layer = entry_node.max_layer;
        drop(entry_node);

        for lc in (1..=entry_max_layer.min(max_layer)).rev() {
            let (new_ep, new_dist) = self.search_layer_greedy(&curr_ep, query, lc);
            if new_dist < curr_dist {
                curr_ep = new_ep;
                curr_dist = new_dist;
            }
        }

        let candidates = self.search_layer(&curr_ep, query, ef, 0);
        let now_ms = chrono::Utc::now().timestamp_millis();

        let mut results: Vec<VectorSearchResult> = candidates
            .into_iter()
            .filter_map(|(id, dist)| {
                let node = self.nodes.get(&id)?;
                if !opts.filter.matches(&node.metadata, now_ms) {
                    return None;
                }
                let score = 1.0 - dist;
                (score >= opts.threshold).then(|| VectorSearchResult::new(id.clone(), score))
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(opts.top_k.max(1));
        results
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn clear(&self) {
        self.nodes.clear();
        for layer in &self.layers {
            if let Ok(mut guard) = layer.write() {
                guard.edges.clear();
            }
        }
        *self.entry_point.write().unwrap() = None;
        self.max_layer.store(0, std::sync::atomic::Ordering::Relaxed);
    }
}
