//! Duplicate detection: clustering memories whose vectors are pairwise
//! similar enough to be considered the same knowledge contributed
//! twice, and the merge-keep policy used to collapse a cluster.
use crate::vector::Vector;

/// How to pick the surviving memory's content when merging a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepPolicy {
    /// Keep the content of the most recently created member.
    Newest,
    /// Keep the content with the most characters.
    Longest,
    /// Caller supplies the winning index explicitly.
    Manual,
}

/// Build clusters of ids whose pairwise cosine similarity is at least
/// `threshold`. Single-link clustering: transitively-similar ids join
/// the same cluster even if two specific members fall just under the
/// threshold against each other, as long as a chain of >= threshold
/// links connects them.
pub fn find_duplicates(candidates: &[(String, Vector)], threshold: f32) -> Vec<Vec<String>> {
    let n = candidates.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }

    fn union(parent: &mut [usize], a: usize, b: usize) {
        let ra = find(parent, a);
        let rb = find(parent, b);
        if ra != rb {
            parent[ra] = rb;
        }
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if let Some(sim) = candidates[i].1.cosine_similarity(&candidates[j].1) {
                if sim >= threshold {
                    union(&mut parent, i, j);
                }
            }
        }
    }

    let mut clusters: std::collections::HashMap<usize, Vec<String>> = std::collections::HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        clusters.entry(root).or_default().push(candidates[i].0.clone());
    }

    clusters.into_values().filter(|c| c.len() > 1).collect()
}

/// Pick the winning index in `members` under `policy`. `created_at` and
/// `content_len` are parallel to `members`.
pub fn pick_keeper(policy: KeepPolicy, created_at: &[i64], content_len: &[usize], manual_index: Option<usize>) -> usize {
    match policy {
        KeepPolicy::Newest => created_at
            .iter()
            .enumerate()
            .max_by_key(|(_, t)| **t)
            .map(|(i, _)| i)
            .unwrap_or(0),
        KeepPolicy::Longest => content_len
            .iter()
            .enumerate()
            .max_by_key(|(_, l)| **l)
            .map(|(i, _)| i)
            .unwrap_or(0),
        KeepPolicy::Manual => manual_index.unwrap_or(0),
    }
}
