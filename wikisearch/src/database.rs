//! SQLite database layer for saved-page metadata
//!
//! One `saved_pages` row per page downloaded for offline reading.
//! Uses r2d2 connection pooling to allow concurrent reads without mutex blocking.

use crate::models::{SavedPage, TitleRow};
use crate::sources::MetadataStore;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Thread-safe database wrapper using connection pooling
///
/// Title search and offline enrichment read concurrently; WAL mode keeps
/// them from blocking each other or the occasional save.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create a database at the given path with connection pooling
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| {
                conn.execute_batch("
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA cache_size=-8000;
                ")?;
                Ok(())
            });

        let pool = Pool::builder()
            .max_size(4)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::memory();

        // In-memory needs single connection to maintain state
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    fn get_conn(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn setup_schema(&self) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS saved_pages (
                pageId TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                canonicalUrl TEXT NOT NULL,
                revisionId INTEGER NOT NULL DEFAULT 0,
                savedAt INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_saved_pages_title ON saved_pages(title COLLATE NOCASE);
        "#)?;
        Ok(())
    }

    /// Insert or replace a saved page
    pub fn upsert_page(&self, page: &SavedPage) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO saved_pages (pageId, title, canonicalUrl, revisionId, savedAt)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(pageId) DO UPDATE SET
                title = excluded.title,
                canonicalUrl = excluded.canonicalUrl,
                revisionId = excluded.revisionId,
                savedAt = excluded.savedAt",
            params![page.page_id, page.title, page.canonical_url, page.revision_id, page.saved_at_unix],
        )?;
        Ok(())
    }

    pub fn delete_page(&self, page_id: &str) -> DatabaseResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM saved_pages WHERE pageId = ?1", params![page_id])?;
        Ok(())
    }

    pub fn count_pages(&self) -> DatabaseResult<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM saved_pages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn fetch_page(&self, page_id: &str) -> DatabaseResult<Option<SavedPage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT pageId, title, canonicalUrl, revisionId, savedAt FROM saved_pages WHERE pageId = ?1",
        )?;
        let mut rows = stmt.query_map(params![page_id], |row| {
            Ok(SavedPage {
                page_id: row.get(0)?,
                title: row.get(1)?,
                canonical_url: row.get(2)?,
                revision_id: row.get(3)?,
                saved_at_unix: row.get(4)?,
            })
        })?;
        let page = rows.next().transpose()?;
        Ok(page)
    }

    /// Escape LIKE wildcards so user input matches literally
    fn escape_like(query: &str) -> String {
        query
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_")
    }
}

impl MetadataStore for Database {
    fn get_by_ids(&self, ids: &[String]) -> DatabaseResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT pageId FROM saved_pages WHERE pageId IN ({})", placeholders);
        let mut stmt = conn.prepare(&sql)?;
        let found = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(found)
    }

    fn search_title_like(&self, pattern: &str, limit: usize) -> DatabaseResult<Vec<TitleRow>> {
        let conn = self.get_conn()?;
        let escaped = Self::escape_like(pattern);
        let like_pattern = format!("%{}%", escaped);
        let prefix_pattern = format!("{}%", escaped);

        // Prefix matches first, then remaining substring matches, each alphabetical
        let mut stmt = conn.prepare(
            r#"SELECT pageId, title FROM saved_pages
               WHERE title LIKE ?1 ESCAPE '\' COLLATE NOCASE
               ORDER BY (title LIKE ?2 ESCAPE '\' COLLATE NOCASE) DESC, title COLLATE NOCASE
               LIMIT ?3"#,
        )?;
        let rows = stmt
            .query_map(params![like_pattern, prefix_pattern, limit as i64], |row| {
                Ok(TitleRow { id: row.get(0)?, title: row.get(1)? })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
