//! The engine context: one owner for every process-wide handle.
//!
//! Store connection, in-memory index, embedding client and result cache all
//! live here, and every operation borrows the context instead of reaching
//! for globals. The index is brought up lazily on the first operation that
//! needs it.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rayon::prelude::*;

use crate::chunker;
use crate::config::{Config, EmbeddingProviderKind};
use crate::diff;
use crate::embed::{model_id_hash, EmbeddingClient, EmbeddingProvider, HttpProvider, ProviderError};
use crate::fetch::{ContentFetcher, HttpFetcher};
use crate::heartbeat::Heartbeat;
use crate::index::manager::IndexManager;
use crate::index::{cosine_similarity, IndexEntry, IndexError};
use crate::quality::{self, PageClass, PLACEHOLDER_BODY};
use crate::results::{Score, SearchHit, SearchResultCache};
use crate::source::{BookmarkSource, BookmarksFile, SourceBookmark, SourceError};
use crate::store::{Bookmark, Store, StoreError};

const DB_FILE: &str = "semdex.db";

/// Chunks pulled from the store per round during a brute-force scan
const SCAN_BATCH_SIZE: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("bookmark source error: {0}")]
    Source(#[from] SourceError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("embedding provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("this build has no local embedding support")]
    LocalUnavailable,
}

/// What one sync pass did, for status reporting.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Bookmarks that got a record and index entries this pass
    pub added: usize,
    /// Bookmarks removed because they are no longer reachable
    pub removed: usize,
    /// Bookmarks newly confirmed dead
    pub dead_links: usize,
    /// Added bookmarks that fell back to title-only indexing
    pub soft_failures: usize,
    /// Bookmarks left unindexed because no chunk could be embedded;
    /// they are retried on the next sync
    pub skipped: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub bookmark_count: u64,
    pub chunk_count: u64,
    pub dead_link_count: u64,
    pub indexed_folders: Vec<String>,
    pub index_loaded: bool,
    pub index_entries: usize,
    pub index_backend: crate::config::IndexBackend,
    pub model: String,
    pub cached_results: usize,
}

enum AddOutcome {
    Indexed { soft: bool },
    Dead,
    Skipped,
}

pub struct Engine {
    config: Config,
    store: Store,
    index: IndexManager,
    cache: SearchResultCache,
    client: EmbeddingClient,
    fetcher: Box<dyn ContentFetcher>,
    source: Box<dyn BookmarkSource>,
    heartbeat: Heartbeat,
    index_loaded: bool,
    model_id: [u8; 32],
}

impl Engine {
    /// Production wiring: SQLite store under the base path, blocking HTTP
    /// fetcher, provider chosen by configuration.
    pub fn init(config: Config) -> Result<Self, EngineError> {
        let store = Store::open(&Path::new(config.base_path()).join(DB_FILE))?;
        let fetcher = HttpFetcher::new(&config.fetch)?;
        let provider = make_provider(&config)?;
        let client = EmbeddingClient::new(provider, &config.embedding);
        let source = Box::new(BookmarksFile::new(&config.source.bookmarks_file));

        Ok(Self::with_parts(
            config,
            store,
            client,
            Box::new(fetcher),
            source,
        ))
    }

    /// Explicit wiring, used by tests and alternative frontends.
    pub fn with_parts(
        config: Config,
        store: Store,
        client: EmbeddingClient,
        fetcher: Box<dyn ContentFetcher>,
        source: Box<dyn BookmarkSource>,
    ) -> Self {
        let model_id = model_id_hash(client.model());
        Self {
            cache: SearchResultCache::new(config.search.page_size),
            index: IndexManager::new(config.index.backend, model_id),
            config,
            store,
            client,
            fetcher,
            source,
            heartbeat: Heartbeat::new(),
            index_loaded: false,
            model_id,
        }
    }

    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }

    pub fn folder_listing(&self) -> Result<Vec<(String, String)>, EngineError> {
        Ok(self.source.snapshot()?.folder_listing())
    }

    pub fn indexed_folders(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.store.indexed_folders()?)
    }

    /// Bring the stored corpus in line with the selected folders.
    ///
    /// Per-bookmark failures are absorbed (dead links recorded, soft
    /// failures indexed by title, unembeddable chunks dropped); only
    /// storage failures abort the pass. Progress text is pushed through
    /// `progress` as the pass advances.
    pub fn sync(
        &mut self,
        selected_folders: &[String],
        progress: &mut dyn FnMut(&str),
    ) -> Result<SyncSummary, EngineError> {
        progress("reading bookmark tree");
        let tree = self.source.snapshot()?;
        let reachable = tree.reachable_from(selected_folders);
        let stored = self.store.bookmark_ids()?;
        let dead = self.store.dead_link_ids()?;
        let diff = diff::compute(reachable, &stored, &dead);

        self.store.set_indexed_folders(selected_folders)?;

        if diff.is_empty() {
            log::info!("sync: nothing to do");
            progress("everything up to date");
            return Ok(SyncSummary::default());
        }
        log::info!(
            "sync: {} to add, {} to remove",
            diff.to_add.len(),
            diff.to_remove.len()
        );

        self.ensure_loaded()?;
        let _guard = self.heartbeat.hold("sync");
        self.index.begin_mutation(&self.store)?;

        let mut summary = SyncSummary::default();

        for id in &diff.to_remove {
            self.remove_bookmark(id)?;
            summary.removed += 1;
        }
        if summary.removed > 0 {
            progress(&format!("removed {} bookmarks", summary.removed));
        }

        let total = diff.to_add.len();
        for (i, bookmark) in diff.to_add.into_iter().enumerate() {
            progress(&format!("indexing {}/{}: {}", i + 1, total, bookmark.title));
            match self.add_bookmark(&bookmark)? {
                AddOutcome::Indexed { soft } => {
                    summary.added += 1;
                    if soft {
                        summary.soft_failures += 1;
                    }
                }
                AddOutcome::Dead => summary.dead_links += 1,
                AddOutcome::Skipped => summary.skipped += 1,
            }
        }

        self.index.finish_mutation(&self.store)?;

        progress(&format!(
            "sync finished: {} added, {} removed, {} dead links, {} title-only",
            summary.added, summary.removed, summary.dead_links, summary.soft_failures
        ));
        Ok(summary)
    }

    fn remove_bookmark(&mut self, id: &str) -> Result<(), EngineError> {
        // Removal is by content match: every chunk vector of the bookmark
        // is reconstructed into the tuple the index holds.
        if let Some(record) = self.store.get_bookmark(id)? {
            let chunks = self.store.chunks_for(id)?;
            let targets: Vec<IndexEntry> = chunks
                .into_iter()
                .map(|chunk| IndexEntry {
                    id: record.id.clone(),
                    title: record.title.clone(),
                    url: record.url.clone(),
                    vector: chunk.embedding,
                })
                .collect();
            self.index.remove_entries(&targets);
        }
        self.store.delete_bookmark(id)?;
        Ok(())
    }

    fn add_bookmark(&mut self, bookmark: &SourceBookmark) -> Result<AddOutcome, EngineError> {
        let outcome = self.fetcher.fetch(&bookmark.url);
        let (body, soft) = match quality::classify(outcome, &self.config.quality) {
            PageClass::DeadLink => {
                log::info!("dead link: {} ({})", bookmark.id, bookmark.url);
                self.store.add_dead_link(&bookmark.id)?;
                return Ok(AddOutcome::Dead);
            }
            PageClass::SoftFailure => {
                log::debug!("title-only indexing for {}", bookmark.id);
                (PLACEHOLDER_BODY.to_string(), true)
            }
            PageClass::Usable(text) => (text, false),
        };

        let text = chunker::document_text(&bookmark.title, &body);
        let mut embedded: Vec<(String, Vec<f32>)> = Vec::new();
        for piece in chunker::chunk(&text, self.config.chunk_chars) {
            match self.client.embed_normalized(&piece) {
                Some(vector) => embedded.push((piece, vector)),
                None => log::warn!("dropping an unembeddable chunk of {}", bookmark.id),
            }
        }

        if embedded.is_empty() {
            log::warn!(
                "no chunk of {} could be embedded, retrying on the next sync",
                bookmark.id
            );
            return Ok(AddOutcome::Skipped);
        }

        let record = Bookmark {
            id: bookmark.id.clone(),
            title: bookmark.title.clone(),
            url: bookmark.url.clone(),
        };
        self.store.insert_bookmark_with_chunks(&record, &embedded)?;

        let entries = embedded
            .into_iter()
            .map(|(_, vector)| IndexEntry {
                id: record.id.clone(),
                title: record.title.clone(),
                url: record.url.clone(),
                vector,
            })
            .collect();
        self.index.add_entries(entries)?;

        Ok(AddOutcome::Indexed { soft })
    }

    /// Rank the corpus against a text query and return the first page.
    ///
    /// A query that cannot be embedded returns an empty page rather than
    /// an error; stale results from an earlier search are discarded
    /// either way.
    pub fn search(&mut self, query: &str) -> Result<Vec<SearchHit>, EngineError> {
        self.ensure_loaded()?;

        let Some(query_vector) = self.client.embed_normalized(query) else {
            log::warn!("query embedding unavailable, returning no results");
            return Ok(self.cache.replace(Vec::new()));
        };

        let hits = if self.index.has_index() {
            self.indexed_search(&query_vector)?
        } else {
            self.fallback_search(&query_vector)?
        };
        log::debug!("search ranked {} bookmarks", hits.len());
        Ok(self.cache.replace(hits))
    }

    /// One page of the most recent search. Out-of-range pages are empty.
    pub fn more_results(&mut self, page: usize) -> Vec<SearchHit> {
        self.cache.page(page)
    }

    fn indexed_search(&mut self, query_vector: &[f32]) -> Result<Vec<SearchHit>, EngineError> {
        let neighbors = self
            .index
            .query(query_vector, self.config.search.candidate_pool);

        // One hit per bookmark, keeping the index's distance order.
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for neighbor in neighbors {
            if !seen.insert(neighbor.id.clone()) {
                continue;
            }
            let chunk = self
                .store
                .first_chunk_text(&neighbor.id)?
                .unwrap_or_else(|| neighbor.title.clone());
            hits.push(SearchHit {
                title: neighbor.title,
                url: neighbor.url,
                chunk,
                score: Score::Distance(neighbor.distance),
            });
        }
        Ok(hits)
    }

    /// Full corpus scan, used when no index is available. Also the
    /// correctness baseline the index path is tested against.
    fn fallback_search(&mut self, query_vector: &[f32]) -> Result<Vec<SearchHit>, EngineError> {
        let min_similarity = self.config.search.min_similarity;
        let mut best: HashMap<String, (f32, crate::store::CorpusRow)> = HashMap::new();
        let mut cursor = 0i64;

        loop {
            let rows = self.store.scan_corpus(cursor, SCAN_BATCH_SIZE)?;
            if rows.is_empty() {
                break;
            }
            if let Some(last) = rows.last() {
                cursor = last.chunk_id;
            }

            let scored: Vec<(crate::store::CorpusRow, f32)> = rows
                .into_par_iter()
                .map(|row| {
                    let similarity = cosine_similarity(query_vector, &row.embedding);
                    (row, similarity)
                })
                .collect();

            for (row, similarity) in scored {
                if similarity < min_similarity {
                    continue;
                }
                match best.get(&row.bookmark_id) {
                    Some((existing, _)) if *existing >= similarity => {}
                    _ => {
                        best.insert(row.bookmark_id.clone(), (similarity, row));
                    }
                }
            }
        }

        let mut ranked: Vec<(f32, crate::store::CorpusRow)> = best.into_values().collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(ranked
            .into_iter()
            .map(|(similarity, row)| SearchHit {
                title: row.title,
                url: row.url,
                chunk: row.chunk_text,
                score: Score::Similarity(similarity),
            })
            .collect())
    }

    /// Delete every stored record, the dead-link registry, the folder
    /// selection and the index snapshot, and drop the in-memory index.
    pub fn clear_all(&mut self) -> Result<(), EngineError> {
        log::info!("clearing all indexed data");
        self.store.clear_all()?;
        self.index = IndexManager::new(self.config.index.backend, self.model_id);
        self.index_loaded = true;
        self.cache.replace(Vec::new());
        Ok(())
    }

    /// Counters over the stored corpus and the in-memory index. Does not
    /// force an index load.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        Ok(EngineStats {
            bookmark_count: self.store.bookmark_count()?,
            chunk_count: self.store.chunk_count()?,
            dead_link_count: self.store.dead_link_count()?,
            indexed_folders: self.store.indexed_folders()?,
            index_loaded: self.index_loaded,
            index_entries: self.index.entry_count(),
            index_backend: self.config.index.backend,
            model: self.client.model().to_string(),
            cached_results: self.cache.cached_len(),
        })
    }

    fn ensure_loaded(&mut self) -> Result<(), EngineError> {
        if self.index_loaded {
            return Ok(());
        }
        let _guard = self.heartbeat.hold("index load");
        self.index.load(&self.store)?;
        self.index_loaded = true;
        Ok(())
    }
}

fn make_provider(config: &Config) -> Result<Box<dyn EmbeddingProvider>, EngineError> {
    match config.embedding.provider {
        EmbeddingProviderKind::Http => Ok(Box::new(HttpProvider::new(&config.embedding)?)),
        #[cfg(feature = "local-embeddings")]
        EmbeddingProviderKind::Local => {
            let cache_dir = Path::new(config.base_path()).join("models");
            Ok(Box::new(crate::embed::LocalProvider::new(
                &config.embedding.model,
                cache_dir,
            )?))
        }
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProviderKind::Local => Err(EngineError::LocalUnavailable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexBackend;
    use crate::fetch::{FetchFailure, FetchOutcome};
    use crate::source::{Folder, StaticSource, TreeSnapshot};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    /// Fetcher double: scripted outcome per url, logging every fetch.
    struct ScriptedFetcher {
        pages: HashMap<String, FetchOutcome>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedFetcher {
        fn new(pages: Vec<(&str, FetchOutcome)>) -> (Self, Arc<Mutex<Vec<String>>>) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let fetcher = Self {
                pages: pages
                    .into_iter()
                    .map(|(url, outcome)| (url.to_string(), outcome))
                    .collect(),
                log: Arc::clone(&log),
            };
            (fetcher, log)
        }
    }

    impl ContentFetcher for ScriptedFetcher {
        fn fetch(&self, url: &str) -> FetchOutcome {
            self.log.lock().unwrap().push(url.to_string());
            match self.pages.get(url) {
                Some(outcome) => outcome.clone(),
                None => FetchOutcome::Failed(FetchFailure::Network("unscripted url".into())),
            }
        }
    }

    /// Provider double mapping keywords to fixed unit vectors, so cosine
    /// similarities in tests are known in advance.
    struct KeywordProvider;

    impl EmbeddingProvider for KeywordProvider {
        fn embed(&self, _model: &str, prompt: &str) -> Result<Vec<f32>, ProviderError> {
            let prompt = prompt.to_lowercase();
            for (keyword, vector) in [
                ("alpha", vec![1.0, 0.0, 0.0]),
                ("beta", vec![0.8, 0.6, 0.0]),
                ("gamma", vec![0.6, 0.8, 0.0]),
                ("delta", vec![0.3, 0.0, 0.9539392]),
            ] {
                if prompt.contains(keyword) {
                    return Ok(vector);
                }
            }
            Err(ProviderError::Request("no keyword in prompt".into()))
        }
    }

    /// Provider double that always fails.
    struct DownProvider;

    impl EmbeddingProvider for DownProvider {
        fn embed(&self, _model: &str, _prompt: &str) -> Result<Vec<f32>, ProviderError> {
            Err(ProviderError::Request("provider down".into()))
        }
    }

    fn page_text(keyword: &str) -> FetchOutcome {
        // Long enough and alphanumeric enough to pass the quality gate.
        FetchOutcome::Text(format!(
            "This page is all about {keyword}. {}",
            format!("More prose about {keyword} follows here. ").repeat(5)
        ))
    }

    fn folder(id: &str, bookmarks: Vec<(&str, &str)>) -> Folder {
        Folder {
            id: id.to_string(),
            title: format!("folder {id}"),
            folders: Vec::new(),
            bookmarks: bookmarks
                .into_iter()
                .map(|(id, title)| SourceBookmark {
                    id: id.to_string(),
                    title: title.to_string(),
                    url: format!("https://example.com/{id}"),
                })
                .collect(),
        }
    }

    fn engine_with(
        dir: &std::path::Path,
        backend: IndexBackend,
        tree: TreeSnapshot,
        pages: Vec<(&str, FetchOutcome)>,
    ) -> (Engine, Arc<Mutex<Vec<String>>>) {
        let mut config = Config::default();
        config.index.backend = backend;

        let store = Store::open(&dir.join("test.db")).unwrap();
        let client = EmbeddingClient::new(Box::new(KeywordProvider), &config.embedding);
        let (fetcher, log) = ScriptedFetcher::new(pages);

        let engine = Engine::with_parts(
            config,
            store,
            client,
            Box::new(fetcher),
            Box::new(StaticSource::new(tree)),
        );
        (engine, log)
    }

    fn no_progress() -> impl FnMut(&str) {
        |_: &str| {}
    }

    fn select(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn http_404_lands_in_the_dead_link_registry() {
        let dir = tempdir().unwrap();
        let tree = TreeSnapshot {
            roots: vec![folder("f1", vec![("a", "Alpha page"), ("d", "Doomed page")])],
        };
        let (mut engine, log) = engine_with(
            dir.path(),
            IndexBackend::Flat,
            tree,
            vec![
                ("https://example.com/a", page_text("alpha")),
                (
                    "https://example.com/d",
                    FetchOutcome::Failed(FetchFailure::ClientError(404)),
                ),
            ],
        );

        let summary = engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.dead_links, 1);

        assert_eq!(engine.store.dead_link_ids().unwrap(), vec!["d".to_string()]);
        assert!(engine.store.get_bookmark("d").unwrap().is_none());
        assert!(engine.store.chunks_for("d").unwrap().is_empty());

        // Still selected, but never fetched again.
        engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();
        let fetched: Vec<String> = log.lock().unwrap().clone();
        let dead_fetches = fetched
            .iter()
            .filter(|u| u.as_str() == "https://example.com/d")
            .count();
        assert_eq!(dead_fetches, 1);
    }

    #[test]
    fn unchanged_selection_makes_the_second_sync_a_no_op() {
        let dir = tempdir().unwrap();
        let tree = TreeSnapshot {
            roots: vec![folder("f1", vec![("a", "Alpha page"), ("b", "Beta page")])],
        };
        let (mut engine, log) = engine_with(
            dir.path(),
            IndexBackend::Flat,
            tree,
            vec![
                ("https://example.com/a", page_text("alpha")),
                ("https://example.com/b", page_text("beta")),
            ],
        );

        let first = engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();
        assert_eq!(first.added, 2);

        let second = engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();
        assert_eq!(second, SyncSummary::default());
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn deselecting_a_folder_removes_exactly_its_bookmarks() {
        let dir = tempdir().unwrap();
        let tree = TreeSnapshot {
            roots: vec![
                folder("f1", vec![("a", "Alpha page")]),
                folder("f2", vec![("b", "Beta page")]),
            ],
        };
        let (mut engine, _log) = engine_with(
            dir.path(),
            IndexBackend::Kdtree,
            tree,
            vec![
                ("https://example.com/a", page_text("alpha")),
                ("https://example.com/b", page_text("beta")),
            ],
        );

        engine.sync(&select(&["f1", "f2"]), &mut no_progress()).unwrap();
        assert_eq!(engine.store.bookmark_count().unwrap(), 2);

        let summary = engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();
        assert_eq!(summary.removed, 1);

        assert!(engine.store.get_bookmark("b").unwrap().is_none());
        assert!(engine.store.chunks_for("b").unwrap().is_empty());
        assert!(engine.store.get_bookmark("a").unwrap().is_some());

        // The index no longer knows "b" either.
        let hits = engine.search("tell me about beta").unwrap();
        assert!(hits.iter().all(|h| h.url != "https://example.com/b"));
        let hits = engine.search("tell me about alpha").unwrap();
        assert_eq!(hits[0].url, "https://example.com/a");
    }

    #[test]
    fn timeouts_fall_back_to_title_only_indexing() {
        let dir = tempdir().unwrap();
        let tree = TreeSnapshot {
            roots: vec![folder("f1", vec![("b", "Beta reference")])],
        };
        let (mut engine, _log) = engine_with(
            dir.path(),
            IndexBackend::Flat,
            tree,
            vec![(
                "https://example.com/b",
                FetchOutcome::Failed(FetchFailure::Timeout),
            )],
        );

        let summary = engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.soft_failures, 1);
        assert_eq!(summary.dead_links, 0);

        let chunks = engine.store.chunks_for("b").unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].chunk_text.contains("Beta reference"));
        assert!(chunks[0].chunk_text.contains(PLACEHOLDER_BODY));

        // The title-only representation is searchable.
        let hits = engine.search("beta").unwrap();
        assert_eq!(hits[0].url, "https://example.com/b");
    }

    #[test]
    fn fallback_ranking_applies_the_similarity_floor() {
        let dir = tempdir().unwrap();
        let (mut engine, _log) = engine_with(
            dir.path(),
            IndexBackend::Flat,
            TreeSnapshot::default(),
            Vec::new(),
        );

        for (id, vector) in [
            ("close", vec![0.8, 0.6, 0.0]),
            ("mid", vec![0.6, 0.8, 0.0]),
            ("far", vec![0.3, 0.0, 0.9539392]),
        ] {
            engine
                .store
                .insert_bookmark_with_chunks(
                    &Bookmark {
                        id: id.to_string(),
                        title: format!("title {id}"),
                        url: format!("https://example.com/{id}"),
                    },
                    &[(format!("chunk of {id}"), vector)],
                )
                .unwrap();
        }

        let hits = engine.fallback_search(&[1.0, 0.0, 0.0]).unwrap();
        let urls: Vec<&str> = hits.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://example.com/close", "https://example.com/mid"]
        );
        match (hits[0].score, hits[1].score) {
            (Score::Similarity(a), Score::Similarity(b)) => {
                assert!((a - 0.8).abs() < 1e-6);
                assert!((b - 0.6).abs() < 1e-6);
            }
            other => panic!("unexpected scores: {other:?}"),
        }
    }

    #[test]
    fn fallback_keeps_only_the_best_chunk_per_bookmark() {
        let dir = tempdir().unwrap();
        let (mut engine, _log) = engine_with(
            dir.path(),
            IndexBackend::Flat,
            TreeSnapshot::default(),
            Vec::new(),
        );

        engine
            .store
            .insert_bookmark_with_chunks(
                &Bookmark {
                    id: "multi".into(),
                    title: "multi-chunk".into(),
                    url: "https://example.com/multi".into(),
                },
                &[
                    ("weak chunk".into(), vec![0.6, 0.8, 0.0]),
                    ("strong chunk".into(), vec![1.0, 0.0, 0.0]),
                ],
            )
            .unwrap();

        let hits = engine.fallback_search(&[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk, "strong chunk");
    }

    #[test]
    fn index_and_fallback_agree_on_the_ranking() {
        let dir = tempdir().unwrap();
        let tree = TreeSnapshot {
            roots: vec![folder(
                "f1",
                vec![("a", "Alpha page"), ("b", "Beta page"), ("g", "Gamma page")],
            )],
        };
        let (mut engine, _log) = engine_with(
            dir.path(),
            IndexBackend::Kdtree,
            tree,
            vec![
                ("https://example.com/a", page_text("alpha")),
                ("https://example.com/b", page_text("beta")),
                ("https://example.com/g", page_text("gamma")),
            ],
        );
        engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();

        let query = [1.0, 0.0, 0.0];
        let indexed = engine.indexed_search(&query).unwrap();
        let fallback = engine.fallback_search(&query).unwrap();

        let top2_indexed: Vec<&str> = indexed.iter().take(2).map(|h| h.url.as_str()).collect();
        let top2_fallback: Vec<&str> = fallback.iter().take(2).map(|h| h.url.as_str()).collect();
        assert_eq!(top2_indexed, top2_fallback);

        for (i, f) in indexed.iter().take(2).zip(fallback.iter().take(2)) {
            let (Score::Distance(distance), Score::Similarity(similarity)) = (i.score, f.score)
            else {
                panic!("unexpected score kinds");
            };
            assert!(((1.0 - distance) - similarity).abs() < 1e-5);
        }
    }

    #[test]
    fn unembeddable_query_fails_closed() {
        let dir = tempdir().unwrap();
        let tree = TreeSnapshot {
            roots: vec![folder("f1", vec![("a", "Alpha page")])],
        };
        let (mut engine, _log) = engine_with(
            dir.path(),
            IndexBackend::Flat,
            tree,
            vec![("https://example.com/a", page_text("alpha"))],
        );
        engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();

        assert!(!engine.search("alpha").unwrap().is_empty());

        // No keyword, the provider errors, the cache is still overwritten.
        assert!(engine.search("zzz nothing").unwrap().is_empty());
        assert!(engine.more_results(1).is_empty());
    }

    #[test]
    fn pagination_is_served_from_the_cached_search() {
        let dir = tempdir().unwrap();
        let tree = TreeSnapshot {
            roots: vec![folder("f1", vec![("a", "Alpha page"), ("b", "Beta page")])],
        };
        let (mut engine, _log) = engine_with(
            dir.path(),
            IndexBackend::Flat,
            tree,
            vec![
                ("https://example.com/a", page_text("alpha")),
                ("https://example.com/b", page_text("beta")),
            ],
        );
        engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();

        let first = engine.search("alpha").unwrap();
        assert_eq!(engine.more_results(1), first);
        assert!(engine.more_results(2).is_empty());
        assert!(engine.more_results(0).is_empty());
    }

    #[test]
    fn clear_all_resets_stores_and_allows_refetching_dead_links() {
        let dir = tempdir().unwrap();
        let tree = TreeSnapshot {
            roots: vec![folder("f1", vec![("a", "Alpha page"), ("d", "Doomed page")])],
        };
        let (mut engine, log) = engine_with(
            dir.path(),
            IndexBackend::Kdtree,
            tree,
            vec![
                ("https://example.com/a", page_text("alpha")),
                (
                    "https://example.com/d",
                    FetchOutcome::Failed(FetchFailure::ClientError(410)),
                ),
            ],
        );
        engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();
        assert!(engine.store.snapshot_blob().unwrap().is_some());

        engine.clear_all().unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.bookmark_count, 0);
        assert_eq!(stats.chunk_count, 0);
        assert_eq!(stats.dead_link_count, 0);
        assert!(stats.indexed_folders.is_empty());
        assert_eq!(stats.index_entries, 0);
        assert!(engine.store.snapshot_blob().unwrap().is_none());
        assert!(engine.search("alpha").unwrap().is_empty());

        // The dead-link registry was part of the reset: the doomed url is
        // fetched again on the next sync.
        engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();
        let dead_fetches = log
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == "https://example.com/d")
            .count();
        assert_eq!(dead_fetches, 2);
    }

    #[test]
    fn a_second_engine_loads_the_snapshot_the_first_one_wrote() {
        let dir = tempdir().unwrap();
        let tree = TreeSnapshot {
            roots: vec![folder("f1", vec![("a", "Alpha page")])],
        };
        let (mut engine, _log) = engine_with(
            dir.path(),
            IndexBackend::Kdtree,
            tree.clone(),
            vec![("https://example.com/a", page_text("alpha"))],
        );
        engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();
        drop(engine);

        let (mut engine, _log) = engine_with(dir.path(), IndexBackend::Kdtree, tree, Vec::new());
        let hits = engine.search("alpha").unwrap();
        assert_eq!(hits[0].url, "https://example.com/a");
        assert_eq!(
            engine.index.origin(),
            crate::index::manager::IndexOrigin::Snapshot
        );
    }

    #[test]
    fn skipped_bookmarks_are_retried_on_the_next_sync() {
        let dir = tempdir().unwrap();
        let tree = TreeSnapshot {
            roots: vec![folder("f1", vec![("x", "No keyword here")])],
        };
        // The page text carries no keyword, so embedding fails and the
        // bookmark stays unindexed.
        let (mut engine, log) = engine_with(
            dir.path(),
            IndexBackend::Flat,
            tree,
            vec![("https://example.com/x", page_text("nothing"))],
        );

        let summary = engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.added, 0);
        assert!(engine.store.get_bookmark("x").unwrap().is_none());

        engine.sync(&select(&["f1"]), &mut no_progress()).unwrap();
        let fetches = log
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == "https://example.com/x")
            .count();
        assert_eq!(fetches, 2);
    }

    #[test]
    fn search_with_a_down_provider_returns_nothing_but_keeps_state() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        let client = EmbeddingClient::new(Box::new(DownProvider), &config.embedding);
        let (fetcher, _log) = ScriptedFetcher::new(Vec::new());
        let mut engine = Engine::with_parts(
            config,
            store,
            client,
            Box::new(fetcher),
            Box::new(StaticSource::new(TreeSnapshot::default())),
        );

        assert!(engine.search("anything").unwrap().is_empty());
        assert_eq!(engine.stats().unwrap().bookmark_count, 0);
    }
}
