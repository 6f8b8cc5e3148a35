//! Read access to the memory store's history log (the source of truth).

use rusqlite::OptionalExtension;
use rusqlite::types::ValueRef;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::memory::core::config::{StorageConfig, is_sql_identifier};
use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::record::{MemoryRecord, RecordTimestamps};
use crate::memory::storage::keyword_index::StoreFuture;

/// History log abstraction.
pub trait HistoryStore: Send + Sync {
    /// Latest non-deleted state of every memory, newest first.
    ///
    /// # Errors
    /// Returns an error if the log cannot be read.
    fn list_latest(&self, limit: Option<usize>) -> StoreFuture<'_, MemoryResult<Vec<MemoryRecord>>>;
    /// Timestamps of the most recent log row for one memory.
    ///
    /// # Errors
    /// Returns an error if the log cannot be read.
    fn latest_timestamps(
        &self,
        memory_id: &str,
    ) -> StoreFuture<'_, MemoryResult<Option<RecordTimestamps>>>;
}

/// One row to append to the history log.
#[derive(Clone, Debug, Default)]
pub struct HistoryEntry {
    /// Memory id the event applies to.
    pub memory_id: String,
    /// Text before the event.
    pub old_memory: Option<String>,
    /// Text after the event.
    pub new_memory: Option<String>,
    /// Event kind (`ADD`, `UPDATE`, `DELETE`).
    pub event: String,
    /// Creation timestamp of the memory.
    pub created_at: Option<String>,
    /// Timestamp of this change.
    pub updated_at: Option<String>,
    /// Tombstone flag.
    pub is_deleted: bool,
}

/// `SQLite` history log in the mem0 `history` table layout.
pub struct SqliteHistoryStore {
    conn: Connection,
    table: String,
}

impl SqliteHistoryStore {
    /// Open the history log at the configured database path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> MemoryResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::with_connection(conn, &config.history_table).await
    }

    /// Use an existing connection, creating the history table if it is missing.
    ///
    /// # Errors
    /// Returns an error if `table` is not a plain identifier or cannot be created.
    pub async fn with_connection(conn: Connection, table: &str) -> MemoryResult<Self> {
        if !is_sql_identifier(table) {
            return Err(MemoryError::InvalidConfig(format!(
                "invalid history table name {table:?}"
            )));
        }
        let table_name = table.to_string();
        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id TEXT PRIMARY KEY,
                    memory_id TEXT,
                    old_memory TEXT,
                    new_memory TEXT,
                    event TEXT,
                    created_at DATETIME,
                    updated_at DATETIME,
                    is_deleted INTEGER,
                    actor_id TEXT,
                    role TEXT
                );"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            table: table.to_string(),
        })
    }

    /// Append a row to the log.
    ///
    /// # Errors
    /// Returns an error if the row cannot be written.
    pub async fn append_event(&self, entry: HistoryEntry) -> MemoryResult<()> {
        let table = self.table.clone();
        let row_id = Uuid::new_v4().to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO {table}
                        (id, memory_id, old_memory, new_memory, event, created_at, updated_at, is_deleted)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                    ),
                    rusqlite::params![
                        row_id,
                        entry.memory_id,
                        entry.old_memory,
                        entry.new_memory,
                        entry.event,
                        entry.created_at,
                        entry.updated_at,
                        i64::from(entry.is_deleted)
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// Read a column as text whatever its storage class.
fn column_text(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    let value = match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    };
    Ok(value)
}

impl HistoryStore for SqliteHistoryStore {
    fn list_latest(&self, limit: Option<usize>) -> StoreFuture<'_, MemoryResult<Vec<MemoryRecord>>> {
        Box::pin(async move {
            let table = self.table.clone();
            // SQLite treats a negative LIMIT as unbounded.
            let limit = match limit {
                Some(limit) => i64::try_from(limit)
                    .map_err(|_| MemoryError::InvalidConfig("limit exceeds i64".to_string()))?,
                None => -1,
            };
            let records = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT h.memory_id, h.new_memory, h.created_at, h.updated_at
                         FROM {table} h
                         INNER JOIN (
                             SELECT memory_id, MAX(rowid) AS max_rowid
                             FROM {table}
                             GROUP BY memory_id
                         ) latest ON h.memory_id = latest.memory_id AND h.rowid = latest.max_rowid
                         WHERE COALESCE(h.event, '') != 'DELETE'
                           AND COALESCE(h.is_deleted, 0) = 0
                           AND h.new_memory IS NOT NULL
                         ORDER BY h.created_at DESC
                         LIMIT ?1"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![limit], |row| {
                            Ok(MemoryRecord {
                                id: row.get(0)?,
                                text: row.get(1)?,
                                created_at: column_text(row, 2)?,
                                updated_at: column_text(row, 3)?,
                            })
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(records)
        })
    }

    fn latest_timestamps(
        &self,
        memory_id: &str,
    ) -> StoreFuture<'_, MemoryResult<Option<RecordTimestamps>>> {
        let memory_id = memory_id.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let timestamps = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!(
                                "SELECT created_at, updated_at FROM {table}
                                 WHERE memory_id = ?1
                                 ORDER BY rowid DESC
                                 LIMIT 1"
                            ),
                            rusqlite::params![memory_id],
                            |row| {
                                Ok(RecordTimestamps {
                                    created_at: column_text(row, 0)?,
                                    updated_at: column_text(row, 1)?,
                                })
                            },
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(timestamps)
        })
    }
}
