//! Memory engine orchestration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::memory::core::config::{MemoryConfig, SearchParams};
use crate::memory::core::errors::MemoryResult;
use crate::memory::core::record::{AddEvent, MemoryRecord};
use crate::memory::retrieval::hybrid_search::{HybridSearcher, SearchResponse};
use crate::memory::retrieval::vector_client::{
    Mem0HttpClient, NoopVectorClient, VectorSearchClient,
};
use crate::memory::storage::history_store::{HistoryStore, SqliteHistoryStore};
use crate::memory::storage::keyword_index::{KeywordIndex, SqliteKeywordIndex};

/// Outcome of a keyword index rebuild.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    /// Always `"rebuilt"`.
    pub status: String,
    /// Number of memories now indexed.
    pub indexed: usize,
}

/// Latest memory states read from the history log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryListing {
    /// Records, newest first.
    pub results: Vec<MemoryRecord>,
    /// Where the listing came from.
    pub source: String,
}

/// Backend dependencies for the memory engine.
pub struct MemoryBackends {
    /// Lexical index.
    pub keyword_index: Arc<dyn KeywordIndex>,
    /// Source-of-truth history log.
    pub history: Arc<dyn HistoryStore>,
    /// Vector similarity search.
    pub vector_client: Arc<dyn VectorSearchClient>,
}

impl MemoryBackends {
    /// Build default `SQLite` backends from config.
    ///
    /// The history log and the keyword index share one connection. The vector client talks
    /// HTTP when `vector.base_url` is set and is a no-op otherwise.
    ///
    /// # Errors
    /// Returns an error if any backend cannot be initialized.
    pub async fn sqlite(config: &MemoryConfig) -> MemoryResult<Self> {
        if let Some(parent) = config
            .storage
            .sqlite_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&config.storage.sqlite_path).await?;
        let history =
            SqliteHistoryStore::with_connection(conn.clone(), &config.storage.history_table)
                .await?;
        let keyword_index =
            SqliteKeywordIndex::with_connection(conn, &config.storage.fts_table).await?;

        let vector_client: Arc<dyn VectorSearchClient> = if config.vector.base_url.is_some() {
            let client = Mem0HttpClient::new(&config.vector)?;
            info!(url = client.search_url(), "Vector search enabled");
            Arc::new(client)
        } else {
            info!("No vector backend configured, searching keyword-only");
            Arc::new(NoopVectorClient)
        };

        Ok(Self {
            keyword_index: Arc::new(keyword_index),
            history: Arc::new(history),
            vector_client,
        })
    }
}

/// Memory engine: hybrid search plus keyword index maintenance.
pub struct MemoryEngine {
    config: MemoryConfig,
    keyword_index: Arc<dyn KeywordIndex>,
    history: Arc<dyn HistoryStore>,
    searcher: HybridSearcher,
}

impl MemoryEngine {
    /// Create a new memory engine.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: MemoryConfig, backends: MemoryBackends) -> MemoryResult<Self> {
        config.validate()?;
        let searcher = HybridSearcher::new(
            Arc::clone(&backends.keyword_index),
            backends.vector_client,
            Arc::clone(&backends.history),
            config.vector.timeout(),
        );

        Ok(Self {
            config,
            keyword_index: backends.keyword_index,
            history: backends.history,
            searcher,
        })
    }

    /// Create a new engine using `SQLite` backends.
    ///
    /// # Errors
    /// Returns an error if backends cannot be initialized.
    pub async fn from_config(config: MemoryConfig) -> MemoryResult<Self> {
        let backends = MemoryBackends::sqlite(&config).await?;
        Self::new(config, backends)
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Ranked hybrid search. `params` defaults to the configured search knobs.
    ///
    /// # Errors
    /// Returns an error only for invalid parameters; backend failures degrade results.
    pub async fn search(
        &self,
        query: &str,
        params: Option<SearchParams>,
    ) -> MemoryResult<SearchResponse> {
        let params = params.unwrap_or_else(|| self.config.search.default_params());
        let results = self.searcher.search(query, &params).await?;
        debug!(query, results = results.len(), "Search finished");
        Ok(SearchResponse { results })
    }

    /// Rebuild the keyword index from the history log.
    ///
    /// # Errors
    /// Returns an error if the log cannot be read or the index cannot be written.
    pub async fn rebuild_index(&self) -> MemoryResult<RebuildReport> {
        let records = self.history.list_latest(None).await?;
        let indexed = self.keyword_index.replace_all(records).await?;
        info!(indexed, "Keyword index rebuilt");
        Ok(RebuildReport {
            status: "rebuilt".to_string(),
            indexed,
        })
    }

    /// Index one memory. Failures are logged, never returned.
    ///
    /// Returns whether the memory was indexed.
    pub async fn index_single(&self, id: &str, text: &str) -> bool {
        if id.is_empty() || text.is_empty() {
            debug!(id, "Skipping memory without id or text");
            return false;
        }
        match self.keyword_index.upsert(id, text).await {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, id, "Failed to index memory");
                false
            }
        }
    }

    /// Index the results of an add call on the memory store.
    ///
    /// Deletions, no-ops and events without text are skipped. Returns the number indexed.
    pub async fn index_add_events(&self, events: &[AddEvent]) -> usize {
        let mut indexed = 0;
        for event in events.iter().filter(|e| e.is_indexable()) {
            if self.index_single(&event.id, &event.memory).await {
                indexed += 1;
            }
        }
        debug!(events = events.len(), indexed, "Indexed add events");
        indexed
    }

    /// Latest state of stored memories from the history log, newest first.
    ///
    /// # Errors
    /// Returns an error if the log cannot be read.
    pub async fn list_memories(&self, limit: usize) -> MemoryResult<MemoryListing> {
        let results = self.history.list_latest(Some(limit)).await?;
        Ok(MemoryListing {
            results,
            source: "history_db".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::memory::core::errors::MemoryError;
    use crate::memory::core::record::AddEvents;
    use crate::memory::storage::history_store::HistoryEntry;
    use crate::memory::storage::keyword_index::{KeywordHit, StoreFuture};

    async fn engine_with_history() -> (MemoryEngine, Arc<SqliteHistoryStore>) {
        let conn = Connection::open_in_memory().await.unwrap();
        let history = Arc::new(
            SqliteHistoryStore::with_connection(conn.clone(), "history")
                .await
                .unwrap(),
        );
        let keyword_index = Arc::new(
            SqliteKeywordIndex::with_connection(conn, "memory_fts")
                .await
                .unwrap(),
        );
        let backends = MemoryBackends {
            keyword_index,
            history: history.clone(),
            vector_client: Arc::new(NoopVectorClient),
        };
        let engine = MemoryEngine::new(MemoryConfig::default(), backends).unwrap();
        (engine, history)
    }

    async fn add(history: &SqliteHistoryStore, id: &str, text: &str, created_at: &str) {
        history
            .append_event(HistoryEntry {
                memory_id: id.to_string(),
                new_memory: Some(text.to_string()),
                event: "ADD".to_string(),
                created_at: Some(created_at.to_string()),
                ..HistoryEntry::default()
            })
            .await
            .unwrap();
    }

    struct BrokenIndex;

    impl KeywordIndex for BrokenIndex {
        fn replace_all(&self, _records: Vec<MemoryRecord>) -> StoreFuture<'_, MemoryResult<usize>> {
            Box::pin(async { Err(MemoryError::InvalidRecord("index offline".to_string())) })
        }

        fn upsert(&self, _id: &str, _text: &str) -> StoreFuture<'_, MemoryResult<()>> {
            Box::pin(async { Err(MemoryError::InvalidRecord("index offline".to_string())) })
        }

        fn query(&self, _text: &str, _limit: usize) -> StoreFuture<'_, MemoryResult<Vec<KeywordHit>>> {
            Box::pin(async { Err(MemoryError::InvalidRecord("index offline".to_string())) })
        }

        fn len(&self) -> StoreFuture<'_, MemoryResult<usize>> {
            Box::pin(async { Ok(0) })
        }
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let (engine, history) = engine_with_history().await;
        let day_ago = (Utc::now() - Duration::days(1)).to_rfc3339();
        add(&history, "A", "quarterly revenue growth", &day_ago).await;
        add(&history, "B", "Q3 revenue growth numbers", &day_ago).await;
        add(&history, "C", "favorite coffee order", &day_ago).await;

        let first = engine.rebuild_index().await.unwrap();
        let first_hits = engine.search("revenue growth", None).await.unwrap();
        let second = engine.rebuild_index().await.unwrap();
        let second_hits = engine.search("revenue growth", None).await.unwrap();

        assert_eq!(first.status, "rebuilt");
        assert_eq!(first, second);
        assert_eq!(first.indexed, 3);
        let ids = |r: &SearchResponse| r.results.iter().map(|h| h.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first_hits), ids(&second_hits));
        assert_eq!(ids(&first_hits), vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_rebuild_skips_deleted_memories() {
        let (engine, history) = engine_with_history().await;
        add(&history, "keep", "rust borrow checker notes", "2024-01-01T00:00:00Z").await;
        add(&history, "gone", "rust macro notes", "2024-01-02T00:00:00Z").await;
        history
            .append_event(HistoryEntry {
                memory_id: "gone".to_string(),
                old_memory: Some("rust macro notes".to_string()),
                event: "DELETE".to_string(),
                is_deleted: true,
                ..HistoryEntry::default()
            })
            .await
            .unwrap();

        let report = engine.rebuild_index().await.unwrap();
        assert_eq!(report.indexed, 1);
        let response = engine.search("rust", None).await.unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, "keep");
    }

    #[tokio::test]
    async fn test_index_add_events_skips_deletes_and_noops() {
        let (engine, _history) = engine_with_history().await;
        let events: Vec<AddEvent> = serde_json::from_str::<AddEvents>(
            r#"{"results": [
                {"id": "m1", "memory": "enjoys trail running", "event": "ADD"},
                {"id": "m2", "memory": "prefers window seats", "event": "UPDATE"},
                {"id": "m3", "memory": "old fact", "event": "DELETE"},
                {"id": "m4", "memory": "unchanged", "event": "NONE"},
                {"id": "", "memory": "no id"}
            ]}"#,
        )
        .unwrap()
        .into_events();

        assert_eq!(engine.index_add_events(&events).await, 2);
        let response = engine.search("trail running", None).await.unwrap();
        assert_eq!(response.results[0].id, "m1");
        assert!(engine.search("unchanged", None).await.unwrap().results.is_empty());
    }

    #[tokio::test]
    async fn test_index_single_is_best_effort() {
        let conn = Connection::open_in_memory().await.unwrap();
        let history = SqliteHistoryStore::with_connection(conn, "history")
            .await
            .unwrap();
        let backends = MemoryBackends {
            keyword_index: Arc::new(BrokenIndex),
            history: Arc::new(history),
            vector_client: Arc::new(NoopVectorClient),
        };
        let engine = MemoryEngine::new(MemoryConfig::default(), backends).unwrap();

        assert!(!engine.index_single("m1", "some text").await);
        assert!(!engine.index_single("", "some text").await);
        assert!(engine.search("text", None).await.unwrap().results.is_empty());
    }

    #[tokio::test]
    async fn test_list_memories_from_history() {
        let (engine, history) = engine_with_history().await;
        add(&history, "m1", "first", "2024-01-01T00:00:00Z").await;
        add(&history, "m2", "second", "2024-02-01T00:00:00Z").await;
        add(&history, "m3", "third", "2024-03-01T00:00:00Z").await;

        let listing = engine.list_memories(2).await.unwrap();
        assert_eq!(listing.source, "history_db");
        let ids: Vec<&str> = listing.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2"]);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let conn = Connection::open_in_memory().await.unwrap();
        let history = SqliteHistoryStore::with_connection(conn, "history")
            .await
            .unwrap();
        let mut config = MemoryConfig::default();
        config.search.mmr_lambda = 2.0;
        let backends = MemoryBackends {
            keyword_index: Arc::new(BrokenIndex),
            history: Arc::new(history),
            vector_client: Arc::new(NoopVectorClient),
        };
        assert!(MemoryEngine::new(config, backends).is_err());
    }

    #[tokio::test]
    async fn test_sqlite_backends_create_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MemoryConfig::default();
        config.storage.sqlite_path = dir.path().join("nested").join("recall.db");

        let engine = MemoryEngine::from_config(config.clone()).await.unwrap();
        assert!(config.storage.sqlite_path.exists());
        assert!(engine.index_single("m1", "persisted note").await);
        let response = engine.search("persisted", None).await.unwrap();
        assert_eq!(response.results.len(), 1);
    }
}
