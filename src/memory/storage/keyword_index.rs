//! Lexical keyword index backed by `SQLite` FTS5.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::memory::core::config::{StorageConfig, is_sql_identifier};
use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::record::MemoryRecord;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A lexical match with its BM25 score (higher is better).
#[derive(Clone, Debug, PartialEq)]
pub struct KeywordHit {
    /// Memory id.
    pub id: String,
    /// Indexed text.
    pub text: String,
    /// Sign-inverted BM25 rank.
    pub score: f64,
}

/// Keyword index abstraction.
pub trait KeywordIndex: Send + Sync {
    /// Replace every entry with `records` atomically. Returns the number of entries indexed.
    ///
    /// # Errors
    /// Returns an error if the index cannot be written; the previous content stays visible.
    fn replace_all(&self, records: Vec<MemoryRecord>) -> StoreFuture<'_, MemoryResult<usize>>;
    /// Insert or replace the entry for one memory.
    ///
    /// # Errors
    /// Returns an error if the index cannot be written.
    fn upsert(&self, id: &str, text: &str) -> StoreFuture<'_, MemoryResult<()>>;
    /// Ranked lexical query, best match first.
    ///
    /// Malformed match expressions are retried as a literal phrase, then yield nothing.
    ///
    /// # Errors
    /// Returns an error only if the index itself is unavailable.
    fn query(&self, text: &str, limit: usize) -> StoreFuture<'_, MemoryResult<Vec<KeywordHit>>>;
    /// Number of indexed entries.
    ///
    /// # Errors
    /// Returns an error if the index cannot be read.
    fn len(&self) -> StoreFuture<'_, MemoryResult<usize>>;
    /// Whether the index holds no entries.
    ///
    /// # Errors
    /// Returns an error if the index cannot be read.
    fn is_empty(&self) -> StoreFuture<'_, MemoryResult<bool>> {
        Box::pin(async move { Ok(self.len().await? == 0) })
    }
}

/// Quote `query` as a single FTS5 phrase.
#[must_use]
pub fn quote_phrase(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

/// FTS5-backed keyword index.
pub struct SqliteKeywordIndex {
    conn: Connection,
    table: String,
}

impl SqliteKeywordIndex {
    /// Open the index at the configured database path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the table cannot be created.
    pub async fn new(config: &StorageConfig) -> MemoryResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::with_connection(conn, &config.fts_table).await
    }

    /// Build the index on an existing connection, creating the FTS5 table if needed.
    ///
    /// # Errors
    /// Returns an error if `table` is not a plain identifier or cannot be created.
    pub async fn with_connection(conn: Connection, table: &str) -> MemoryResult<Self> {
        if !is_sql_identifier(table) {
            return Err(MemoryError::InvalidConfig(format!(
                "invalid keyword index table name {table:?}"
            )));
        }
        let table_name = table.to_string();
        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS {table_name}
                 USING fts5(memory_id UNINDEXED, memory);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            table: table.to_string(),
        })
    }
}

fn match_rows(
    conn: &rusqlite::Connection,
    table: &str,
    expression: &str,
    limit: i64,
) -> rusqlite::Result<Vec<KeywordHit>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT memory_id, memory, bm25({table}) AS score
         FROM {table}
         WHERE {table} MATCH ?1
         ORDER BY score
         LIMIT ?2"
    ))?;
    let hits = stmt
        .query_map(rusqlite::params![expression, limit], |row| {
            let raw: f64 = row.get(2)?;
            Ok(KeywordHit {
                id: row.get(0)?,
                text: row.get(1)?,
                score: -raw,
            })
        })?
        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
    Ok(hits)
}

impl KeywordIndex for SqliteKeywordIndex {
    fn replace_all(&self, records: Vec<MemoryRecord>) -> StoreFuture<'_, MemoryResult<usize>> {
        Box::pin(async move {
            let table = self.table.clone();
            let indexed = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(&format!("DELETE FROM {table}"), [])?;
                    let mut seen = HashSet::with_capacity(records.len());
                    {
                        let mut stmt = tx.prepare(&format!(
                            "INSERT INTO {table} (memory_id, memory) VALUES (?1, ?2)"
                        ))?;
                        for record in &records {
                            if !seen.insert(record.id.as_str()) {
                                continue;
                            }
                            stmt.execute(rusqlite::params![record.id, record.text])?;
                        }
                    }
                    let indexed = seen.len();
                    tx.commit()?;
                    Ok(indexed)
                })
                .await?;
            debug!(indexed, table = %self.table, "Keyword index replaced");
            Ok(indexed)
        })
    }

    fn upsert(&self, id: &str, text: &str) -> StoreFuture<'_, MemoryResult<()>> {
        let id = id.to_string();
        let text = text.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        &format!("DELETE FROM {table} WHERE memory_id = ?1"),
                        rusqlite::params![id],
                    )?;
                    tx.execute(
                        &format!("INSERT INTO {table} (memory_id, memory) VALUES (?1, ?2)"),
                        rusqlite::params![id, text],
                    )?;
                    tx.commit()?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn query(&self, text: &str, limit: usize) -> StoreFuture<'_, MemoryResult<Vec<KeywordHit>>> {
        let expression = text.trim().to_string();
        Box::pin(async move {
            if expression.is_empty() || limit == 0 {
                return Ok(Vec::new());
            }
            let limit = i64::try_from(limit)
                .map_err(|_| MemoryError::InvalidConfig("limit exceeds i64".to_string()))?;
            let table = self.table.clone();
            let hits = self
                .conn
                .call(move |conn| {
                    let hits = match match_rows(conn, &table, &expression, limit) {
                        Ok(hits) => hits,
                        Err(err) => {
                            debug!(%err, "Match expression rejected, retrying as phrase");
                            let phrase = quote_phrase(&expression);
                            match_rows(conn, &table, &phrase, limit).unwrap_or_else(|err| {
                                warn!(%err, "Phrase query failed, returning no keyword hits");
                                Vec::new()
                            })
                        }
                    };
                    Ok(hits)
                })
                .await?;
            Ok(hits)
        })
    }

    fn len(&self) -> StoreFuture<'_, MemoryResult<usize>> {
        Box::pin(async move {
            let table = self.table.clone();
            let count = self
                .conn
                .call(move |conn| {
                    let count =
                        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                            row.get::<_, i64>(0)
                        })?;
                    Ok(count)
                })
                .await?;
            usize::try_from(count)
                .map_err(|_| MemoryError::InvalidRecord("negative index size".to_string()))
        })
    }
}
