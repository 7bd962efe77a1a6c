//! Tree-backed backend: a k-d tree over the entry vectors, rebuilt on
//! structural change and queried with branch-and-bound nearest-neighbor
//! descent. Pruning happens in squared Euclidean space, which ranks the
//! same as cosine distance over unit vectors; reported distances are
//! recomputed as cosine so both backends score identically.

use super::{
    by_distance, cosine_distance, remove_matching, IndexEntry, IndexError, Neighbor, VectorIndex,
};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub struct KdTreeIndex {
    dimensions: Option<usize>,
    entries: Vec<IndexEntry>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

struct Node {
    entry: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// Max-heap item; the worst candidate stays on top so it can be evicted.
struct Candidate {
    sq_dist: f32,
    entry: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.sq_dist.total_cmp(&other.sq_dist) == Ordering::Equal
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sq_dist.total_cmp(&other.sq_dist)
    }
}

impl Default for KdTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KdTreeIndex {
    pub fn new() -> Self {
        Self {
            dimensions: None,
            entries: Vec::new(),
            nodes: Vec::new(),
            root: None,
        }
    }

    fn rebuild(&mut self) {
        self.nodes.clear();
        self.root = None;

        let Some(dims) = self.dimensions else { return };
        if self.entries.is_empty() {
            return;
        }

        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        self.root = build_subtree(&self.entries, &mut self.nodes, &mut order, 0, dims);
    }

    fn visit(
        &self,
        node_idx: usize,
        query: &[f32],
        k: usize,
        depth: usize,
        dims: usize,
        heap: &mut BinaryHeap<Candidate>,
    ) {
        let node = &self.nodes[node_idx];
        let point = &self.entries[node.entry].vector;

        let sq = sq_dist(query, point);
        if heap.len() < k {
            heap.push(Candidate {
                sq_dist: sq,
                entry: node.entry,
            });
        } else if sq < heap.peek().map(|c| c.sq_dist).unwrap_or(f32::INFINITY) {
            heap.pop();
            heap.push(Candidate {
                sq_dist: sq,
                entry: node.entry,
            });
        }

        let axis = depth % dims;
        let diff = query[axis] - point[axis];
        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(n) = near {
            self.visit(n, query, k, depth + 1, dims, heap);
        }

        let worst = heap.peek().map(|c| c.sq_dist).unwrap_or(f32::INFINITY);
        if heap.len() < k || diff * diff < worst {
            if let Some(f) = far {
                self.visit(f, query, k, depth + 1, dims, heap);
            }
        }
    }
}

fn build_subtree(
    entries: &[IndexEntry],
    nodes: &mut Vec<Node>,
    order: &mut [usize],
    depth: usize,
    dims: usize,
) -> Option<usize> {
    if order.is_empty() {
        return None;
    }

    let axis = depth % dims;
    let mid = order.len() / 2;
    order.select_nth_unstable_by(mid, |&a, &b| {
        entries[a].vector[axis].total_cmp(&entries[b].vector[axis])
    });

    let node_idx = nodes.len();
    nodes.push(Node {
        entry: order[mid],
        left: None,
        right: None,
    });

    let (lo, rest) = order.split_at_mut(mid);
    let hi = &mut rest[1..];
    let left = build_subtree(entries, nodes, lo, depth + 1, dims);
    let right = build_subtree(entries, nodes, hi, depth + 1, dims);

    nodes[node_idx].left = left;
    nodes[node_idx].right = right;
    Some(node_idx)
}

fn sq_dist(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl VectorIndex for KdTreeIndex {
    fn add(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        for entry in &entries {
            let dims = *self.dimensions.get_or_insert(entry.vector.len());
            if entry.vector.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    expected: dims,
                    got: entry.vector.len(),
                });
            }
        }
        if entries.is_empty() {
            return Ok(());
        }
        self.entries.extend(entries);
        self.rebuild();
        Ok(())
    }

    fn remove(&mut self, targets: &[IndexEntry]) -> usize {
        let removed = remove_matching(&mut self.entries, targets);
        if removed > 0 {
            self.rebuild();
        }
        removed
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let Some(dims) = self.dimensions else {
            return Vec::new();
        };
        if query.len() != dims || k == 0 {
            return Vec::new();
        }

        let mut heap = BinaryHeap::new();
        if let Some(root) = self.root {
            self.visit(root, query, k, 0, dims, &mut heap);
        }

        let mut hits: Vec<Neighbor> = heap
            .into_iter()
            .map(|c| {
                let entry = &self.entries[c.entry];
                Neighbor {
                    id: entry.id.clone(),
                    title: entry.title.clone(),
                    url: entry.url.clone(),
                    distance: cosine_distance(query, &entry.vector),
                }
            })
            .collect();
        hits.sort_by(|a, b| by_distance(a.distance, b.distance));
        hits
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::flat::FlatIndex;
    use crate::index::test_fixtures::{axis, entry};

    /// Deterministic pseudo-random unit vectors.
    fn unit_vectors(count: usize, dims: usize) -> Vec<Vec<f32>> {
        let mut seed: u64 = 0x5DEECE66D;
        let mut next = move || {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((seed >> 33) as f32 / (1u64 << 31) as f32) * 2.0 - 1.0
        };

        (0..count)
            .map(|_| {
                let v: Vec<f32> = (0..dims).map(|_| next()).collect();
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                v.into_iter().map(|x| x / norm).collect()
            })
            .collect()
    }

    #[test]
    fn agrees_with_the_exhaustive_scan() {
        let vectors = unit_vectors(64, 8);
        let queries = unit_vectors(5, 8);

        let mut tree = KdTreeIndex::new();
        let mut flat = FlatIndex::new();
        for (i, v) in vectors.iter().enumerate() {
            let e = entry(&format!("e{i}"), v.clone());
            tree.add(vec![e.clone()]).unwrap();
            flat.add(vec![e]).unwrap();
        }

        for q in &queries {
            let tree_hits = tree.search(q, 10);
            let flat_hits = flat.search(q, 10);
            let tree_ids: Vec<&str> = tree_hits.iter().map(|n| n.id.as_str()).collect();
            let flat_ids: Vec<&str> = flat_hits.iter().map(|n| n.id.as_str()).collect();
            assert_eq!(tree_ids, flat_ids);

            for (t, f) in tree_hits.iter().zip(&flat_hits) {
                assert!((t.distance - f.distance).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn nearest_neighbor_ordering_is_exact() {
        let mut index = KdTreeIndex::new();
        index
            .add(vec![
                axis("x", 4, 0),
                axis("y", 4, 1),
                axis("z", 4, 2),
                axis("w", 4, 3),
            ])
            .unwrap();

        let hits = index.search(&[0.9, 0.1, 0.0, 0.0], 2);
        assert_eq!(hits[0].id, "x");
        assert_eq!(hits[1].id, "y");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[test]
    fn removal_rebuilds_the_tree() {
        let mut index = KdTreeIndex::new();
        index
            .add(vec![axis("a", 3, 0), axis("b", 3, 1), axis("c", 3, 2)])
            .unwrap();

        let removed = index.remove(&[axis("a", 3, 0)]);
        assert_eq!(removed, 1);
        assert_eq!(index.len(), 2);

        let hits = index.search(&[1.0, 0.0, 0.0], 3);
        assert_eq!(hits.len(), 2);
        assert_ne!(hits[0].id, "a");
    }

    #[test]
    fn mismatched_query_dimension_yields_nothing() {
        let mut index = KdTreeIndex::new();
        index.add(vec![axis("a", 4, 0)]).unwrap();
        assert!(index.search(&[1.0, 0.0], 5).is_empty());
    }

    #[test]
    fn empty_tree_yields_nothing() {
        let index = KdTreeIndex::new();
        assert!(index.search(&[1.0, 0.0], 5).is_empty());
    }
}
