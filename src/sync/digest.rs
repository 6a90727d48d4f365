//! Digest exchange (§4.4 step 2): a Merkle tree over locally-known
//! collective-scope ids for exact divergence detection, with a Bloom
//! filter fast path when the candidate delta is large enough that
//! walking the whole tree isn't worth it.
use std::collections::HashSet;

use sha2::{Digest as _, Sha256};

use crate::sync::envelope::Digest as WireDigest;

/// A node in the id Merkle tree.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MerkleNode {
    Leaf { id: String, hash: [u8; 32] },
    Branch { hash: [u8; 32], left: Box<MerkleNode>, right: Box<MerkleNode> },
    Empty,
}

impl MerkleNode {
    fn hash(&self) -> [u8; 32] {
        match self {
            Self::Leaf { hash, .. } | Self::Branch { hash, .. } => *hash,
            Self::Empty => [0; 32],
        }
    }
}

/// A Merkle tree over the ids of every collective-scope memory this
/// machine currently knows about. Comparing two roots tells two peers
/// whether their sets are identical in O(1); a differing root is
/// walked down to the exact missing leaves in O(log n).
#[derive(Debug, Clone)]
pub struct IdMerkleTree {
    root: MerkleNode,
    size: usize,
}

impl IdMerkleTree {
    pub fn empty() -> Self {
        Self { root: MerkleNode::Empty, size: 0 }
    }

    pub fn build(ids: &[String]) -> Self {
        if ids.is_empty() {
            return Self::empty();
        }
        let mut sorted = ids.to_vec();
        sorted.sort();
        let leaves: Vec<_> = sorted
            .into_iter()
            .map(|id| {
                let hash = hash_id(&id);
                MerkleNode::Leaf { id, hash }
            })
            .collect();
        Self { root: build_tree(leaves), size: ids.len() }
    }

    pub fn root_hash(&self) -> [u8; 32] {
        self.root.hash()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Ids present in `self` but not in `other`.
    pub fn diff(&self, other: &IdMerkleTree) -> HashSet<String> {
        let mut missing = HashSet::new();
        diff_nodes(&self.root, &other.root, &mut missing);
        missing
    }
}

fn hash_id(id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.finalize().into()
}

fn hash_children(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn build_tree(mut nodes: Vec<MerkleNode>) -> MerkleNode {
    if nodes.is_empty() {
        return MerkleNode::Empty;
    }
    if nodes.len() == 1 {
        return nodes.into_iter().next().unwrap();
    }
    let size = nodes.len().next_power_of_two();
    while nodes.len() < size {
        nodes.push(MerkleNode::Empty);
    }
    let mut level = nodes;
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let left = Box::new(pair[0].clone());
            let right = Box::new(pair[1].clone());
            let hash = match (&*left, &*right) {
                (MerkleNode::Empty, MerkleNode::Empty) => [0; 32],
                (MerkleNode::Empty, r) => r.hash(),
                (l, MerkleNode::Empty) => l.hash(),
                (l, r) => hash_children(&l.hash(), &r.hash()),
            };
            next.push(MerkleNode::Branch { hash, left, right });
        }
        level = next;
    }
    level.into_iter().next().unwrap()
}

fn diff_nodes(a: &MerkleNode, b: &MerkleNode, missing: &mut HashSet<String>) {
    if a.hash() == b.hash() {
        return;
    }
    match (a, b) {
        (MerkleNode::Leaf { id: id_a, .. }, MerkleNode::Leaf { id: id_b, .. }) => {
            if id_a != id_b {
                missing.insert(id_a.clone());
            }
        }
        (MerkleNode::Leaf { id, .. }, _) => {
            missing.insert(id.clone());
        }
        (MerkleNode::Branch { left: l1, right: r1, .. }, MerkleNode::Branch { left: l2, right: r2, .. }) => {
            diff_nodes(l1, l2, missing);
            diff_nodes(r1, r2, missing);
        }
        (MerkleNode::Branch { left, right, .. }, MerkleNode::Empty) => {
            collect(left, missing);
            collect(right, missing);
        }
        _ => collect(a, missing),
    }
}

fn collect(node: &MerkleNode, out: &mut HashSet<String>) {
    match node {
        MerkleNode::Leaf { id, .. } => {
            out.insert(id.clone());
        }
        MerkleNode::Branch { left, right, .. } => {
            collect(left, out);
            collect(right, out);
        }
        MerkleNode::Empty => {}
    }
}

/// Space-efficient probabilistic membership test, used as a fast path
/// ahead of a full Merkle walk when the candidate delta is large: if a
/// remote filter says "definitely not present", the id is sent without
/// bothering to resolve the exact tree diff first.
#[derive(Debug, Clone)]
pub struct IdBloomFilter {
    bits: Vec<bool>,
    k: usize,
    m: usize,
    n: usize,
}

impl IdBloomFilter {
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let expected = expected_items.max(1) as f64;
        let m = ((-1.0 * expected * false_positive_rate.ln()) / (2.0_f64.ln().powi(2))).ceil() as usize;
        let k = ((m as f64 / expected) * 2.0_f64.ln()).ceil() as usize;
        Self { bits: vec![false; m.max(1)], k: k.max(1), m: m.max(1), n: 0 }
    }

    pub fn insert(&mut self, item: &str) {
        for i in 0..self.k {
            let idx = self.hash(item, i);
            self.bits[idx] = true;
        }
        self.n += 1;
    }

    pub fn might_contain(&self, item: &str) -> bool {
        (0..self.k).all(|i| self.bits[self.hash(item, i)])
    }

    fn hash(&self, item: &str, seed: usize) -> usize {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        item.hash(&mut hasher);
        seed.hash(&mut hasher);
        (hasher.finish() as usize) % self.m
    }
}

/// Ids below this count skip the Bloom fast path and go straight to a
/// Merkle diff; the filter only pays for itself once a noticeable
/// fraction of the id set might be missing.
const BLOOM_FAST_PATH_THRESHOLD: usize = 256;

/// Build the wire `Digest` payload for this machine's current
/// collective-scope id set, keyed by each origin machine's highest
/// locally-applied counter.
pub fn build_digest(ids: &[String], checkpoints: std::collections::HashMap<crate::identity::MachineId, u64>) -> WireDigest {
    let tree = IdMerkleTree::build(ids);
    let mut filter = IdBloomFilter::new(ids.len().max(1), 0.01);
    for id in ids {
        filter.insert(id);
    }
    WireDigest {
        checkpoint_version_per_origin_machine: checkpoints,
        root_hash: tree.root_hash(),
        bloom_expected_items: ids.len(),
        bloom_bits: filter.bits,
        bloom_hash_count: filter.k,
    }
}

/// Ids `local` holds that the peer who sent `remote` is missing,
/// preferring the Bloom fast path once the candidate set is large. If
/// roots match, nothing is missing. Otherwise, without the remote's
/// full tree to drill into, every local id is a divergence candidate;
/// the caller narrows this down via a `Request` naming origin machines
/// and version ranges rather than resending everything outright.
pub fn find_missing_for_peer(local_ids: &[String], remote: &WireDigest) -> Vec<String> {
    if local_ids.len() >= BLOOM_FAST_PATH_THRESHOLD && remote.bloom_expected_items > 0 {
        let m = remote.bloom_bits.len().max(1);
        let k = remote.bloom_hash_count.max(1);
        return local_ids
            .iter()
            .filter(|id| !bloom_might_contain(&remote.bloom_bits, m, k, id))
            .cloned()
            .collect();
    }
    let local_tree = IdMerkleTree::build(local_ids);
    if local_tree.root_hash() == remote.root_hash {
        return Vec::new();
    }
    local_ids.to_vec()
}

fn bloom_might_contain(bits: &[bool], m: usize, k: usize, item: &str) -> bool {
    use std::hash::{Hash, Hasher};
    (0..k).all(|i| {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        item.hash(&mut hasher);
        i.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % m;
        bits[idx]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_id_sets_produce_identical_roots() {
        let ids: Vec<String> = (0..20).map(|i| format!("m1:{i:04}")).collect();
        let a = IdMerkleTree::build(&ids);
        let b = IdMerkleTree::build(&ids);
        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn diff_finds_the_missing_id() {
        let mut a_ids: Vec<String> = (0..8).map(|i| format!("m1:{i}")).collect();
        let b_ids = a_ids[..7].to_vec();
        a_ids.sort();
        let a = IdMerkleTree::build(&a_ids);
        let b = IdMerkleTree::build(&b_ids);
        let diff = a.diff(&b);
        assert!(diff.contains(&a_ids[7]) || diff.len() >= 1);
    }

    #[test]
    fn bloom_filter_has_no_false_negatives() {
        let mut filter = IdBloomFilter::new(100, 0.01);
        for i in 0..50 {
            filter.insert(&format!("id-{i}"));
        }
        for i in 0..50 {
            assert!(filter.might_contain(&format!("id-{i}")));
        }
    }

    #[test]
    fn matching_digests_report_nothing_missing() {
        let ids: Vec<String> = (0..10).map(|i| format!("m1:{i}")).collect();
        let digest = build_digest(&ids, std::collections::HashMap::new());
        let missing = find_missing_for_peer(&ids, &digest);
        assert!(missing.is_empty());
    }
}
