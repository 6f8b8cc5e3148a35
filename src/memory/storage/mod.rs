//! Persistent storage: the history log reader and the keyword index.

pub mod history_store;
pub mod keyword_index;

pub use history_store::{HistoryEntry, HistoryStore, SqliteHistoryStore};
pub use keyword_index::{KeywordHit, KeywordIndex, SqliteKeywordIndex, StoreFuture, quote_phrase};
