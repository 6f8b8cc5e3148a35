//! Memory search subsystem.
//!
//! This module ranks memories owned by an external memory store, organized into:
//! - `core`: Configuration, errors and record types
//! - `storage`: History log reader and FTS5 keyword index with `SQLite` backends
//! - `retrieval`: Vector client, score fusion, temporal decay and MMR re-ranking
//! - `engine`: Main orchestration and index maintenance

pub mod core;
pub mod engine;
pub mod retrieval;
pub mod storage;

// Re-export commonly used types for convenience
pub use core::{
    AddEvent, AddEvents, MemoryConfig, MemoryError, MemoryRecord, MemoryResult, SearchConfig,
    SearchParams, StorageConfig, VectorConfig,
};
pub use engine::{MemoryBackends, MemoryEngine, MemoryListing, RebuildReport};
pub use retrieval::{
    HybridSearcher, Mem0HttpClient, NoopVectorClient, ScoreBreakdown, SearchHit, SearchResponse,
    VectorHit, VectorSearchClient,
};
pub use storage::{
    HistoryEntry, HistoryStore, KeywordHit, KeywordIndex, SqliteHistoryStore, SqliteKeywordIndex,
};
