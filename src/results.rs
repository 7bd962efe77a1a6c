//! Ranked search results and the single-slot pagination cache.

use serde::Serialize;

/// How a hit was scored. Index-backed searches report a cosine distance
/// (smaller is better), the brute-force fallback reports a cosine
/// similarity (larger is better).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Score {
    Distance(f32),
    Similarity(f32),
}

/// One search result, ready to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    /// Representative chunk text for the matched bookmark.
    pub chunk: String,
    #[serde(flatten)]
    pub score: Score,
}

/// Holds the full ranked list of the most recent search. Every new search
/// overwrites it; there is no per-query identity, the last writer wins.
pub struct SearchResultCache {
    hits: Vec<SearchHit>,
    page_size: usize,
    cursor: usize,
}

impl SearchResultCache {
    pub fn new(page_size: usize) -> Self {
        Self {
            hits: Vec::new(),
            page_size,
            cursor: 1,
        }
    }

    /// Replace the cached list and return the first page.
    pub fn replace(&mut self, hits: Vec<SearchHit>) -> Vec<SearchHit> {
        self.hits = hits;
        self.cursor = 1;
        self.page(1)
    }

    /// Return one page of the cached list. Pages are numbered from 1; any
    /// page outside the cached range is empty, never an error.
    pub fn page(&mut self, page: usize) -> Vec<SearchHit> {
        if page == 0 {
            return Vec::new();
        }
        let start = (page - 1).saturating_mul(self.page_size);
        if start >= self.hits.len() {
            return Vec::new();
        }
        let end = start.saturating_add(self.page_size).min(self.hits.len());
        self.cursor = page;
        self.hits[start..end].to_vec()
    }

    pub fn cached_len(&self) -> usize {
        self.hits.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}
