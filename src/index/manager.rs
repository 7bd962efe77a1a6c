//! Lifecycle of the in-memory vector index.
//!
//! The index is loaded once per process: from the serialized snapshot when
//! one exists and matches the configured model, otherwise rebuilt from the
//! chunk store. Mutations follow a delete-first protocol: the snapshot is
//! removed before the first change and a fresh one is written after the
//! last, so a crash mid-mutation leaves no snapshot behind and the next
//! load falls back to a rebuild.

use crate::config::IndexBackend;
use crate::index::flat::FlatIndex;
use crate::index::kdtree::KdTreeIndex;
use crate::index::snapshot;
use crate::index::{IndexEntry, IndexError, Neighbor, VectorIndex};
use crate::store::{Store, StoreError};

/// Chunks pulled from the store per round during a rebuild
const REBUILD_BATCH_SIZE: usize = 1000;

/// Where the current in-memory index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    Snapshot,
    Rebuilt,
}

pub struct IndexManager {
    backend: IndexBackend,
    model_id: [u8; 32],
    index: Option<Box<dyn VectorIndex + Send>>,
    origin: IndexOrigin,
}

impl IndexManager {
    pub fn new(backend: IndexBackend, model_id: [u8; 32]) -> Self {
        Self {
            backend,
            model_id,
            index: None,
            origin: IndexOrigin::Rebuilt,
        }
    }

    /// Bring the index into memory, preferring the stored snapshot.
    ///
    /// A snapshot that fails to decode is not an error: the condition is
    /// logged and the index is rebuilt from the chunk store.
    pub fn load(&mut self, store: &Store) -> Result<(), StoreError> {
        let Some(blob) = store.snapshot_blob()? else {
            log::debug!("no index snapshot, building the index from the chunk store");
            return self.rebuild(store);
        };

        let entries = match snapshot::decode(&blob, &self.model_id) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("stored index snapshot is unusable ({err}), rebuilding");
                return self.rebuild(store);
            }
        };

        if entries.is_empty() {
            self.index = None;
            self.origin = IndexOrigin::Snapshot;
            return Ok(());
        }

        let mut index = make_backend(self.backend);
        match index.add(entries) {
            Ok(()) => {
                log::debug!("loaded vector index from snapshot ({} entries)", index.len());
                self.index = Some(index);
                self.origin = IndexOrigin::Snapshot;
                Ok(())
            }
            Err(err) => {
                log::warn!("snapshot entries were rejected by the index ({err}), rebuilding");
                self.rebuild(store)
            }
        }
    }

    /// Rebuild the index from every chunk in the store, in batches.
    pub fn rebuild(&mut self, store: &Store) -> Result<(), StoreError> {
        let mut index = make_backend(self.backend);
        let mut dimensions: Option<usize> = None;
        let mut cursor = 0i64;

        loop {
            let rows = store.scan_corpus(cursor, REBUILD_BATCH_SIZE)?;
            if rows.is_empty() {
                break;
            }
            if let Some(last) = rows.last() {
                cursor = last.chunk_id;
            }

            let mut batch = Vec::with_capacity(rows.len());
            for row in rows {
                let dims = *dimensions.get_or_insert(row.embedding.len());
                if row.embedding.len() != dims {
                    log::warn!(
                        "chunk {} of bookmark {} has a {}-dimensional embedding, expected {}; skipping it",
                        row.chunk_id,
                        row.bookmark_id,
                        row.embedding.len(),
                        dims
                    );
                    continue;
                }
                batch.push(IndexEntry {
                    id: row.bookmark_id,
                    title: row.title,
                    url: row.url,
                    vector: row.embedding,
                });
            }

            if let Err(err) = index.add(batch) {
                log::warn!("dropped a batch while rebuilding the index: {err}");
            }
        }

        if index.is_empty() {
            self.index = None;
        } else {
            log::debug!("rebuilt vector index with {} entries", index.len());
            self.index = Some(index);
        }
        self.origin = IndexOrigin::Rebuilt;
        Ok(())
    }

    /// Invalidate the stored snapshot ahead of in-memory changes.
    pub fn begin_mutation(&mut self, store: &Store) -> Result<(), StoreError> {
        store.delete_snapshot()
    }

    /// Remove every index entry that matches one of the targets.
    ///
    /// Returns how many entries were dropped. Without a live index this is
    /// a no-op: there is nothing to remove from.
    pub fn remove_entries(&mut self, targets: &[IndexEntry]) -> usize {
        match self.index.as_mut() {
            Some(index) => index.remove(targets),
            None => 0,
        }
    }

    pub fn add_entries(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        let index = self
            .index
            .get_or_insert_with(|| make_backend(self.backend));
        index.add(entries)
    }

    /// Persist the post-mutation state. An empty index is dropped and no
    /// snapshot is written for it.
    pub fn finish_mutation(&mut self, store: &Store) -> Result<(), StoreError> {
        if matches!(&self.index, Some(index) if index.is_empty()) {
            self.index = None;
        }
        let Some(index) = &self.index else {
            return Ok(());
        };

        match snapshot::encode(index.entries(), &self.model_id) {
            Ok(blob) => store.put_snapshot(&blob),
            Err(err) => {
                // Leave the snapshot deleted; the next load rebuilds.
                log::error!("could not serialize the index snapshot: {err}");
                Ok(())
            }
        }
    }

    pub fn query(&self, vector: &[f32], k: usize) -> Vec<Neighbor> {
        match self.index.as_ref() {
            Some(index) => index.search(vector, k),
            None => Vec::new(),
        }
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    pub fn entry_count(&self) -> usize {
        self.index.as_ref().map(|index| index.len()).unwrap_or(0)
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.index
            .as_ref()
            .and_then(|index| index.entries().first())
            .map(|entry| entry.vector.len())
    }

    pub fn origin(&self) -> IndexOrigin {
        self.origin
    }
}

fn make_backend(kind: IndexBackend) -> Box<dyn VectorIndex + Send> {
    match kind {
        IndexBackend::Kdtree => Box::new(KdTreeIndex::new()),
        IndexBackend::Flat => Box::new(FlatIndex::new()),
    }
}
