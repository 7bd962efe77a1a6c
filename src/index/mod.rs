//! The vector index: capability trait, two backends, snapshot codec and
//! the lifecycle manager.
//!
//! The chunk store is the source of truth; every backend holds its entries
//! in memory and can be rebuilt from the store at any time. Backends are
//! selected at runtime, so the exhaustive-scan baseline stays independently
//! testable against the tree-backed one.

pub mod flat;
pub mod kdtree;
pub mod manager;
pub mod snapshot;

use std::cmp::Ordering;

/// One indexed vector with its bookmark payload. Several entries share a
/// bookmark id, one per chunk embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub url: String,
    pub vector: Vec<f32>,
}

/// One ranked query result. `distance` is cosine distance, lower is closer.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub title: String,
    pub url: String,
    pub distance: f32,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// What the sync and search paths program against.
pub trait VectorIndex: Send {
    /// Bulk-add entries. The first entry ever added fixes the dimension.
    fn add(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    /// Bulk-remove by full content match: id, title, url and vector must
    /// all agree, because many entries share an id. Each target removes at
    /// most one matching entry. Returns how many were actually removed.
    fn remove(&mut self, targets: &[IndexEntry]) -> usize;

    /// `k` nearest entries to `query`, closest first.
    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every held entry, in insertion order. This is what gets serialized.
    fn entries(&self) -> &[IndexEntry];
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Cosine similarity with the degenerate zero-norm case pinned to 0.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let denom = l2_norm(a) * l2_norm(b);
    if denom <= f32::EPSILON {
        return 0.0;
    }
    dot(a, b) / denom
}

pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

pub(crate) fn by_distance(a: f32, b: f32) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Shared removal semantics for entry-list backends: one removal per
/// matching target.
pub(crate) fn remove_matching(entries: &mut Vec<IndexEntry>, targets: &[IndexEntry]) -> usize {
    let mut removed = 0;
    for target in targets {
        if let Some(pos) = entries.iter().position(|e| e == target) {
            entries.remove(pos);
            removed += 1;
        }
    }
    removed
}
