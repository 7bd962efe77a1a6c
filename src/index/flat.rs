//! Exhaustive-scan backend. Every query scores every entry; this is the
//! correctness baseline the tree backend is checked against, and a
//! perfectly serviceable index for small corpora.

use super::{by_distance, cosine_distance, remove_matching, IndexEntry, IndexError, Neighbor, VectorIndex};

#[derive(Default)]
pub struct FlatIndex {
    dimensions: Option<usize>,
    entries: Vec<IndexEntry>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorIndex for FlatIndex {
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
        self.entries.extend(entries);
        Ok(())
    }

    fn remove(&mut self, targets: &[IndexEntry]) -> usize {
        remove_matching(&mut self.entries, targets)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let Some(dims) = self.dimensions else {
            return Vec::new();
        };
        if query.len() != dims || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<Neighbor> = self
            .entries
            .iter()
            .map(|entry| Neighbor {
                id: entry.id.clone(),
                title: entry.title.clone(),
                url: entry.url.clone(),
                distance: cosine_distance(query, &entry.vector),
            })
            .collect();

        scored.sort_by(|a, b| by_distance(a.distance, b.distance));
        scored.truncate(k);
        scored
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}
