//! SQLite catalog of authors, books, files and tags

use crate::enrichment::{BookTarget, EnrichmentError, EnrichmentOutcome, OutcomeStore};
use crate::library::ScannedFile;
use crate::normalize::{normalize_author, normalize_title};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

/// Namespace of tags derived from provider categories
pub const TOPIC_PREFIX: &str = "topic:";

/// Source name whose description is kept as `raw_description`
pub const GOOGLE_BOOKS_SOURCE: &str = "google_books";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookSummary {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookFile {
    pub path: String,
    pub size: i64,
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookDetail {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
    pub path: String,
    pub description: Option<String>,
    pub raw_description: Option<String>,
    pub metadata_source: Option<String>,
    pub tags: Vec<String>,
    pub files: Vec<BookFile>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActivityEntry {
    pub id: i64,
    pub action: String,
    pub detail: String,
    pub created_at: String,
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open (or create) the catalog database
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to catalog at: {}", db_path.display()))?;

        let catalog = Self { pool };
        catalog.initialize().await?;

        tracing::info!("Catalog initialized: {}", db_path.display());
        Ok(catalog)
    }

    async fn initialize(&self) -> Result<()> {
        let statements = [
            (
                "authors",
                r#"
                CREATE TABLE IF NOT EXISTS authors (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    normalized_name TEXT
                )
                "#,
            ),
            (
                "books",
                r#"
                CREATE TABLE IF NOT EXISTS books (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    normalized_title TEXT,
                    author_id INTEGER REFERENCES authors(id),
                    path TEXT NOT NULL UNIQUE,
                    description TEXT,
                    raw_description TEXT,
                    metadata_source TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "files",
                r#"
                CREATE TABLE IF NOT EXISTS files (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    book_id INTEGER REFERENCES books(id) ON DELETE SET NULL,
                    path TEXT NOT NULL UNIQUE,
                    size INTEGER NOT NULL,
                    modified_at TEXT,
                    indexed_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "tags",
                r#"
                CREATE TABLE IF NOT EXISTS tags (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE COLLATE NOCASE
                )
                "#,
            ),
            (
                "book_tags",
                r#"
                CREATE TABLE IF NOT EXISTS book_tags (
                    book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
                    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                    PRIMARY KEY (book_id, tag_id)
                )
                "#,
            ),
            (
                "activity_log",
                r#"
                CREATE TABLE IF NOT EXISTS activity_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    action TEXT NOT NULL,
                    detail TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )
                "#,
            ),
        ];

        for (table, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to create {} table", table))?;
        }

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_book_id ON files(book_id)")
            .execute(&self.pool)
            .await
            .context("Failed to create index")?;

        Ok(())
    }

    async fn get_or_create_author(tx: &mut Transaction<'_, Sqlite>, name: &str) -> Result<i64> {
        sqlx::query("INSERT INTO authors (name, normalized_name) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .bind(normalize_author(name))
            .execute(&mut **tx)
            .await
            .context("Failed to insert author")?;

        sqlx::query_scalar::<_, i64>("SELECT id FROM authors WHERE name = ?")
            .bind(name)
            .fetch_one(&mut **tx)
            .await
            .context("Failed to look up author")
    }

    async fn upsert_book(
        tx: &mut Transaction<'_, Sqlite>,
        title: &str,
        author_id: i64,
        path: &str,
        now: &str,
    ) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO books (title, normalized_title, author_id, path, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                title = excluded.title,
                normalized_title = excluded.normalized_title,
                author_id = excluded.author_id
            "#,
        )
        .bind(title)
        .bind(normalize_title(title))
        .bind(author_id)
        .bind(path)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await
        .context("Failed to upsert book")?;

        sqlx::query_scalar::<_, i64>("SELECT id FROM books WHERE path = ?")
            .bind(path)
            .fetch_one(&mut **tx)
            .await
            .context("Failed to look up book")
    }

    /// Record scanned files, creating authors and books as needed.
    /// Returns the number of files indexed.
    pub async fn record_scan(&self, files: &[ScannedFile]) -> Result<usize> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for file in files {
            let book_id = match (&file.author, &file.title, &file.book_path) {
                (Some(author), Some(title), Some(book_path)) => {
                    let author_id = Self::get_or_create_author(&mut tx, author).await?;
                    let book_path = book_path.to_string_lossy();
                    Some(Self::upsert_book(&mut tx, title, author_id, &book_path, &now).await?)
                }
                _ => None,
            };

            sqlx::query(
                r#"
                INSERT INTO files (book_id, path, size, modified_at, indexed_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(path) DO UPDATE SET
                    book_id = excluded.book_id,
                    size = excluded.size,
                    modified_at = excluded.modified_at,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(book_id)
            .bind(file.path.to_string_lossy().into_owned())
            .bind(file.size)
            .bind(&file.modified_at)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to index file: {}", file.path.display()))?;
        }

        tx.commit().await.context("Failed to commit scan")?;
        tracing::info!("Indexed {} files", files.len());
        Ok(files.len())
    }

    /// Snapshot of books to enrich: all books, or only `ids` when given
    pub async fn book_targets(&self, ids: Option<&[i64]>) -> Result<Vec<BookTarget>> {
        let rows = sqlx::query_as::<_, (i64, String, Option<String>, Option<String>, Option<String>)>(
            r#"
            SELECT b.id, b.title, b.normalized_title, a.name, a.normalized_name
            FROM books b
            LEFT JOIN authors a ON a.id = b.author_id
            ORDER BY b.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load enrichment targets")?;

        let wanted: Option<HashSet<i64>> = ids.map(|ids| ids.iter().copied().collect());

        Ok(rows
            .into_iter()
            .filter(|(id, ..)| wanted.as_ref().is_none_or(|wanted| wanted.contains(id)))
            .map(|(id, title, normalized_title, author, normalized_author)| BookTarget {
                book_id: id,
                title,
                author: author.unwrap_or_default(),
                query_title: normalized_title,
                query_author: normalized_author,
            })
            .collect())
    }

    /// Books ordered by title, optionally filtered by a title/author substring
    pub async fn list_books(&self, query: Option<&str>) -> Result<Vec<BookSummary>> {
        let pattern = format!("%{}%", query.map(str::trim).unwrap_or(""));
        let rows = sqlx::query_as::<_, (i64, String, Option<String>, Option<String>)>(
            r#"
            SELECT b.id, b.title, a.name, b.description
            FROM books b
            LEFT JOIN authors a ON a.id = b.author_id
            WHERE b.title LIKE ? OR IFNULL(a.name, '') LIKE ?
            ORDER BY b.title COLLATE NOCASE, b.id
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list books")?;

        Ok(rows
            .into_iter()
            .map(|(id, title, author, description)| BookSummary {
                id,
                title,
                author,
                description,
            })
            .collect())
    }

    pub async fn book_detail(&self, id: i64) -> Result<Option<BookDetail>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                String,
                Option<String>,
                String,
                Option<String>,
                Option<String>,
                Option<String>,
            ),
        >(
            r#"
            SELECT b.id, b.title, a.name, b.path, b.description, b.raw_description, b.metadata_source
            FROM books b
            LEFT JOIN authors a ON a.id = b.author_id
            WHERE b.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch book")?;

        let Some((id, title, author, path, description, raw_description, metadata_source)) = row else {
            return Ok(None);
        };

        Ok(Some(BookDetail {
            id,
            title,
            author,
            path,
            description,
            raw_description,
            metadata_source,
            tags: self.book_tags(id).await?,
            files: self.book_files(id).await?,
        }))
    }

    pub async fn book_tags(&self, book_id: i64) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT t.name FROM tags t
            JOIN book_tags bt ON bt.tag_id = t.id
            WHERE bt.book_id = ?
            ORDER BY t.name
            "#,
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch book tags")
    }

    async fn book_files(&self, book_id: i64) -> Result<Vec<BookFile>> {
        let rows = sqlx::query_as::<_, (String, i64, Option<String>)>(
            "SELECT path, size, modified_at FROM files WHERE book_id = ? ORDER BY path",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch book files")?;

        Ok(rows
            .into_iter()
            .map(|(path, size, modified_at)| BookFile {
                path,
                size,
                modified_at,
            })
            .collect())
    }

    pub async fn log_activity(&self, action: &str, detail: &str) -> Result<()> {
        sqlx::query("INSERT INTO activity_log (action, detail, created_at) VALUES (?, ?, ?)")
            .bind(action)
            .bind(detail)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to write activity log")?;
        Ok(())
    }

    /// Most recent entries first
    pub async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>> {
        let rows = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT id, action, detail, created_at FROM activity_log ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read activity log")?;

        Ok(rows
            .into_iter()
            .map(|(id, action, detail, created_at)| ActivityEntry {
                id,
                action,
                detail,
                created_at,
            })
            .collect())
    }

    /// Delete tags no book refers to; returns how many were removed
    pub async fn clean_unused_tags(&self) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM tags WHERE id NOT IN (SELECT DISTINCT tag_id FROM book_tags)")
            .execute(&self.pool)
            .await
            .context("Failed to clean unused tags")?
            .rows_affected();

        self.log_activity("tags_cleanup", &format!("removed {} unused tags", removed))
            .await?;
        tracing::info!("Removed {} unused tags", removed);
        Ok(removed)
    }

    /// Remove every tag and book link; returns the number of links removed
    pub async fn clear_all_tags(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let links = sqlx::query("DELETE FROM book_tags")
            .execute(&mut *tx)
            .await
            .context("Failed to clear book tags")?
            .rows_affected();
        sqlx::query("DELETE FROM tags")
            .execute(&mut *tx)
            .await
            .context("Failed to clear tags")?;
        tx.commit().await.context("Failed to commit tag clear")?;

        self.log_activity("tags_clear", &format!("removed {} tag links", links))
            .await?;
        tracing::info!("Cleared all tags ({} links)", links);
        Ok(links)
    }
}

#[async_trait]
impl OutcomeStore for Catalog {
    async fn apply_outcome(&self, outcome: &EnrichmentOutcome) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM books WHERE id = ?")
            .bind(outcome.book_id)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to look up book")?;
        if exists == 0 {
            return Err(EnrichmentError::NotFound(format!("book {}", outcome.book_id)).into());
        }

        sqlx::query(
            r#"
            DELETE FROM book_tags
            WHERE book_id = ? AND tag_id IN (SELECT id FROM tags WHERE name NOT LIKE ?)
            "#,
        )
        .bind(outcome.book_id)
        .bind(format!("{}%", TOPIC_PREFIX))
        .execute(&mut *tx)
        .await
        .context("Failed to remove previous tags")?;

        for tag in &outcome.applied_tags {
            let name = collapse_whitespace(tag);
            if name.is_empty() {
                continue;
            }

            sqlx::query("INSERT INTO tags (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
                .bind(&name)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to insert tag {}", name))?;

            let tag_id = sqlx::query_scalar::<_, i64>("SELECT id FROM tags WHERE name = ?")
                .bind(&name)
                .fetch_one(&mut *tx)
                .await
                .with_context(|| format!("Failed to look up tag {}", name))?;

            sqlx::query("INSERT OR IGNORE INTO book_tags (book_id, tag_id) VALUES (?, ?)")
                .bind(outcome.book_id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await
                .context("Failed to link tag")?;
        }

        if outcome.source == GOOGLE_BOOKS_SOURCE
            && let Some(raw) = &outcome.raw_description
        {
            sqlx::query("UPDATE books SET raw_description = ? WHERE id = ?")
                .bind(raw)
                .bind(outcome.book_id)
                .execute(&mut *tx)
                .await
                .context("Failed to store raw description")?;
        }

        if let Some(description) = &outcome.description {
            sqlx::query("UPDATE books SET description = ?, metadata_source = ?, updated_at = ? WHERE id = ?")
                .bind(description)
                .bind(&outcome.source)
                .bind(&now)
                .bind(outcome.book_id)
                .execute(&mut *tx)
                .await
                .context("Failed to store description")?;
        }

        tx.commit().await.context("Failed to commit outcome")?;
        tracing::debug!(
            "Applied outcome for book {}: {} tags",
            outcome.book_id,
            outcome.applied_tags.len()
        );
        Ok(())
    }

    async fn record_activity(&self, action: &str, detail: &str) -> Result<()> {
        self.log_activity(action, detail).await
    }
}
