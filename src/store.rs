//! SQLite-backed persistent state: bookmark records, chunk records with
//! their embeddings, the dead-link registry, the tracked-folder list and
//! the serialized index snapshot.
//!
//! Layout: `bookmarks` keyed by the source's bookmark id; `chunks` keyed by
//! a surrogate rowid with a secondary index on the owning bookmark id;
//! `dead_links` as a bare id set; `meta` as a key/value table holding the
//! folder list and the snapshot blob under fixed keys. Multi-row mutations
//! for one bookmark happen inside a single transaction.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const SCHEMA_VERSION: &str = "1";

const META_SCHEMA_VERSION: &str = "schema_version";
const META_INDEXED_FOLDERS: &str = "indexed_folders";
const META_INDEX_SNAPSHOT: &str = "index_snapshot";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported schema version {0}")]
    SchemaVersion(String),

    #[error("malformed value under meta key '{0}'")]
    MalformedMeta(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// One stored chunk of one bookmark.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub chunk_id: i64,
    pub bookmark_id: String,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
}

/// A chunk joined with its owning bookmark, as streamed by corpus scans.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusRow {
    pub chunk_id: i64,
    pub bookmark_id: String,
    pub title: String,
    pub url: String,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                 key TEXT PRIMARY KEY,
                 value BLOB NOT NULL
             );
             CREATE TABLE IF NOT EXISTS bookmarks (
                 id TEXT PRIMARY KEY,
                 title TEXT NOT NULL,
                 url TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS chunks (
                 chunk_id INTEGER PRIMARY KEY AUTOINCREMENT,
                 bookmark_id TEXT NOT NULL,
                 chunk_text TEXT NOT NULL,
                 embedding BLOB NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_chunks_bookmark ON chunks(bookmark_id);
             CREATE TABLE IF NOT EXISTS dead_links (
                 bookmark_id TEXT PRIMARY KEY
             );",
        )?;

        match self.get_meta(META_SCHEMA_VERSION)? {
            None => self.set_meta(META_SCHEMA_VERSION, SCHEMA_VERSION.as_bytes())?,
            Some(v) if v == SCHEMA_VERSION.as_bytes() => {}
            Some(v) => {
                return Err(StoreError::SchemaVersion(
                    String::from_utf8_lossy(&v).into_owned(),
                ))
            }
        }

        Ok(())
    }

    // ----- bookmarks -----

    pub fn get_bookmark(&self, id: &str) -> Result<Option<Bookmark>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, url FROM bookmarks WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Bookmark {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        url: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn bookmark_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT id FROM bookmarks ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn bookmark_count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM bookmarks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Create the bookmark record together with all of its chunks, as one
    /// transaction. Replaces any stale record under the same id.
    pub fn insert_bookmark_with_chunks(
        &mut self,
        bookmark: &Bookmark,
        chunks: &[(String, Vec<f32>)],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM chunks WHERE bookmark_id = ?1",
            params![bookmark.id],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO bookmarks (id, title, url) VALUES (?1, ?2, ?3)",
            params![bookmark.id, bookmark.title, bookmark.url],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (bookmark_id, chunk_text, embedding) VALUES (?1, ?2, ?3)",
            )?;
            for (chunk_text, embedding) in chunks {
                stmt.execute(params![
                    bookmark.id,
                    chunk_text,
                    embedding_to_blob(embedding)
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete the record and every chunk it owns, as one transaction.
    pub fn delete_bookmark(&mut self, id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE bookmark_id = ?1", params![id])?;
        tx.execute("DELETE FROM bookmarks WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    // ----- chunks -----

    pub fn chunks_for(&self, bookmark_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT chunk_id, bookmark_id, chunk_text, embedding
             FROM chunks WHERE bookmark_id = ?1 ORDER BY chunk_id",
        )?;
        let rows = stmt
            .query_map(params![bookmark_id], |row| {
                Ok(ChunkRecord {
                    chunk_id: row.get(0)?,
                    bookmark_id: row.get(1)?,
                    chunk_text: row.get(2)?,
                    embedding: blob_to_embedding(&row.get::<_, Vec<u8>>(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The representative chunk shown with search hits: first match under
    /// the secondary bookmark-id index.
    pub fn first_chunk_text(&self, bookmark_id: &str) -> Result<Option<String>, StoreError> {
        let text = self
            .conn
            .query_row(
                "SELECT chunk_text FROM chunks WHERE bookmark_id = ?1
                 ORDER BY chunk_id LIMIT 1",
                params![bookmark_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    pub fn chunk_count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Stream chunks joined with their bookmark, keyset-paginated on the
    /// surrogate id. Pass the last seen `chunk_id` (0 to start); an empty
    /// result means the scan is done.
    pub fn scan_corpus(&self, after: i64, limit: usize) -> Result<Vec<CorpusRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.chunk_id, c.bookmark_id, b.title, b.url, c.chunk_text, c.embedding
             FROM chunks c JOIN bookmarks b ON b.id = c.bookmark_id
             WHERE c.chunk_id > ?1 ORDER BY c.chunk_id LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![after, limit as i64], |row| {
                Ok(CorpusRow {
                    chunk_id: row.get(0)?,
                    bookmark_id: row.get(1)?,
                    title: row.get(2)?,
                    url: row.get(3)?,
                    chunk_text: row.get(4)?,
                    embedding: blob_to_embedding(&row.get::<_, Vec<u8>>(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ----- dead links -----

    pub fn add_dead_link(&self, bookmark_id: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO dead_links (bookmark_id) VALUES (?1)",
            params![bookmark_id],
        )?;
        Ok(())
    }

    pub fn dead_link_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT bookmark_id FROM dead_links ORDER BY bookmark_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn dead_link_count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM dead_links", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ----- tracked folders -----

    pub fn indexed_folders(&self) -> Result<Vec<String>, StoreError> {
        match self.get_meta(META_INDEXED_FOLDERS)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|_| StoreError::MalformedMeta(META_INDEXED_FOLDERS)),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_indexed_folders(&self, folders: &[String]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(folders)
            .map_err(|_| StoreError::MalformedMeta(META_INDEXED_FOLDERS))?;
        self.set_meta(META_INDEXED_FOLDERS, &bytes)
    }

    // ----- index snapshot -----

    pub fn snapshot_blob(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_meta(META_INDEX_SNAPSHOT)
    }

    pub fn put_snapshot(&self, blob: &[u8]) -> Result<(), StoreError> {
        self.set_meta(META_INDEX_SNAPSHOT, blob)
    }

    pub fn delete_snapshot(&self) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM meta WHERE key = ?1",
            params![META_INDEX_SNAPSHOT],
        )?;
        Ok(())
    }

    // ----- whole-store operations -----

    /// Wipe every record, the registry, the folder list and the snapshot.
    /// The schema stays usable afterwards.
    pub fn clear_all(&mut self) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM chunks", [])?;
        tx.execute("DELETE FROM bookmarks", [])?;
        tx.execute("DELETE FROM dead_links", [])?;
        tx.execute(
            "DELETE FROM meta WHERE key != ?1",
            params![META_SCHEMA_VERSION],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ----- meta -----

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
