//! Hybrid search combining FTS5 keyword matching with vector similarity.
//!
//! Both sources are over-fetched concurrently, merged by id, normalized and fused, then
//! discounted by age and diversified with MMR. A failing or slow vector backend degrades
//! the query to keyword-only results instead of failing it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::memory::core::config::SearchParams;
use crate::memory::core::errors::MemoryResult;
use crate::memory::retrieval::diversity::DiversityReranker;
use crate::memory::retrieval::fusion::{
    Candidate, FusionWeights, fuse, merge_candidates, overfetch_limit,
};
use crate::memory::retrieval::ranking::TemporalDecay;
use crate::memory::retrieval::vector_client::{VectorHit, VectorSearchClient};
use crate::memory::storage::history_store::HistoryStore;
use crate::memory::storage::keyword_index::{KeywordHit, KeywordIndex};

/// Per-stage scores attached to every result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Raw vector similarity (0 when only matched lexically).
    pub vector: f64,
    /// Raw BM25 score (0 when only matched by vector search).
    pub bm25: f64,
    /// Fused score before decay.
    pub fused: f64,
    /// Age used for decay.
    pub age_days: f64,
    /// Final score after decay.
    pub decayed: f64,
}

/// One ranked search result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Memory id.
    pub id: String,
    /// Memory text.
    pub memory: String,
    /// Final score.
    pub score: f64,
    /// Creation timestamp.
    pub created_at: Option<String>,
    /// Last update timestamp.
    pub updated_at: Option<String>,
    /// Score breakdown.
    pub debug: ScoreBreakdown,
}

/// Search output envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Ranked results, best first.
    pub results: Vec<SearchHit>,
}

/// Round to 4 decimal places.
#[must_use]
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

impl From<Candidate> for SearchHit {
    fn from(candidate: Candidate) -> Self {
        Self {
            score: round4(candidate.decayed_score),
            debug: ScoreBreakdown {
                vector: round4(candidate.vector_score.unwrap_or(0.0)),
                bm25: round4(candidate.bm25_score.unwrap_or(0.0)),
                fused: round4(candidate.fused_score),
                age_days: round4(candidate.age_days),
                decayed: round4(candidate.decayed_score),
            },
            id: candidate.id,
            memory: candidate.text,
            created_at: candidate.created_at,
            updated_at: candidate.updated_at,
        }
    }
}

/// Search pipeline over injected backends.
#[derive(Clone)]
pub struct HybridSearcher {
    keyword_index: Arc<dyn KeywordIndex>,
    vector_client: Arc<dyn VectorSearchClient>,
    history: Arc<dyn HistoryStore>,
    vector_timeout: Duration,
}

impl HybridSearcher {
    /// Create a searcher. Vector calls slower than `vector_timeout` count as failed.
    #[must_use]
    pub fn new(
        keyword_index: Arc<dyn KeywordIndex>,
        vector_client: Arc<dyn VectorSearchClient>,
        history: Arc<dyn HistoryStore>,
        vector_timeout: Duration,
    ) -> Self {
        Self {
            keyword_index,
            vector_client,
            history,
            vector_timeout,
        }
    }

    /// Run a search relative to the current time.
    ///
    /// # Errors
    /// Returns an error only for invalid parameters.
    pub async fn search(&self, query: &str, params: &SearchParams) -> MemoryResult<Vec<SearchHit>> {
        self.search_at(query, params, Utc::now()).await
    }

    /// Run a search with ages measured from `now`.
    ///
    /// # Errors
    /// Returns an error only for invalid parameters.
    pub async fn search_at(
        &self,
        query: &str,
        params: &SearchParams,
        now: DateTime<Utc>,
    ) -> MemoryResult<Vec<SearchHit>> {
        params.validate()?;
        let decay = TemporalDecay::new(params.half_life_days)?;
        let reranker = DiversityReranker::new(params.mmr_lambda)?;
        if params.limit == 0 {
            return Ok(Vec::new());
        }

        let fetch = overfetch_limit(params.limit);
        let (vector_hits, keyword_hits) =
            tokio::join!(self.fetch_vector(query, fetch), self.fetch_keyword(query, fetch));
        debug!(
            vector = vector_hits.len(),
            keyword = keyword_hits.len(),
            "Candidates fetched"
        );

        let mut candidates = merge_candidates(vector_hits, keyword_hits);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        self.backfill_timestamps(&mut candidates).await;

        fuse(
            &mut candidates,
            FusionWeights {
                vector: params.vector_weight,
                text: params.text_weight,
            },
        );
        decay.apply(&mut candidates, now);

        Ok(reranker
            .rerank(candidates, params.limit)
            .into_iter()
            .map(SearchHit::from)
            .collect())
    }

    async fn fetch_vector(&self, query: &str, limit: usize) -> Vec<VectorHit> {
        match tokio::time::timeout(self.vector_timeout, self.vector_client.search(query, limit))
            .await
        {
            Ok(Ok(hits)) => hits,
            Ok(Err(err)) => {
                warn!(%err, "Vector search failed, continuing keyword-only");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    timeout = ?self.vector_timeout,
                    "Vector search timed out, continuing keyword-only"
                );
                Vec::new()
            }
        }
    }

    async fn fetch_keyword(&self, query: &str, limit: usize) -> Vec<KeywordHit> {
        self.keyword_index
            .query(query, limit)
            .await
            .unwrap_or_else(|err| {
                warn!(%err, "Keyword search failed, continuing without lexical hits");
                Vec::new()
            })
    }

    async fn backfill_timestamps(&self, candidates: &mut [Candidate]) {
        let undated = candidates
            .iter_mut()
            .filter(|c| c.created_at.is_none() && c.updated_at.is_none());
        for candidate in undated {
            match self.history.latest_timestamps(&candidate.id).await {
                Ok(Some(ts)) => {
                    candidate.created_at = ts.created_at;
                    candidate.updated_at = ts.updated_at;
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(%err, id = %candidate.id, "No timestamps for undated hit");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Duration as ChronoDuration;
    use tokio_rusqlite::Connection;

    use super::*;
    use crate::memory::core::errors::MemoryError;
    use crate::memory::retrieval::vector_client::{NoopVectorClient, SearchFuture};
    use crate::memory::storage::history_store::{HistoryEntry, SqliteHistoryStore};
    use crate::memory::storage::keyword_index::SqliteKeywordIndex;

    struct FailingVector;

    impl VectorSearchClient for FailingVector {
        fn search(&self, _query: &str, _limit: usize) -> SearchFuture<'_, MemoryResult<Vec<VectorHit>>> {
            Box::pin(async { Err(MemoryError::InvalidRecord("backend down".to_string())) })
        }
    }

    struct HangingVector;

    impl VectorSearchClient for HangingVector {
        fn search(&self, _query: &str, _limit: usize) -> SearchFuture<'_, MemoryResult<Vec<VectorHit>>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            })
        }
    }

    struct FixedVector(Vec<VectorHit>);

    impl VectorSearchClient for FixedVector {
        fn search(&self, _query: &str, _limit: usize) -> SearchFuture<'_, MemoryResult<Vec<VectorHit>>> {
            let hits = self.0.clone();
            Box::pin(async move { Ok(hits) })
        }
    }

    async fn seeded_stores(
        now: DateTime<Utc>,
    ) -> (Arc<SqliteKeywordIndex>, Arc<SqliteHistoryStore>) {
        let conn = Connection::open_in_memory().await.unwrap();
        let history = SqliteHistoryStore::with_connection(conn.clone(), "history")
            .await
            .unwrap();
        let index = SqliteKeywordIndex::with_connection(conn, "memory_fts")
            .await
            .unwrap();

        let day_ago = (now - ChronoDuration::days(1)).to_rfc3339();
        for (id, text) in [
            ("A", "quarterly revenue growth"),
            ("B", "Q3 revenue growth numbers"),
            ("C", "favorite coffee order"),
        ] {
            history
                .append_event(HistoryEntry {
                    memory_id: id.to_string(),
                    new_memory: Some(text.to_string()),
                    event: "ADD".to_string(),
                    created_at: Some(day_ago.clone()),
                    ..HistoryEntry::default()
                })
                .await
                .unwrap();
        }
        let records = history.list_latest(None).await.unwrap();
        index.replace_all(records).await.unwrap();

        (Arc::new(index), Arc::new(history))
    }

    fn searcher(
        index: Arc<SqliteKeywordIndex>,
        history: Arc<SqliteHistoryStore>,
        vector: Arc<dyn VectorSearchClient>,
    ) -> HybridSearcher {
        HybridSearcher::new(index, vector, history, Duration::from_millis(50))
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_keyword_only_revenue_scenario() {
        let now = Utc::now();
        let (index, history) = seeded_stores(now).await;
        let searcher = searcher(index, history, Arc::new(NoopVectorClient));
        let params = SearchParams {
            limit: 2,
            vector_weight: 0.0,
            text_weight: 1.0,
            ..SearchParams::default()
        };

        let hits = searcher
            .search_at("revenue growth", &params, now)
            .await
            .unwrap();
        assert_eq!(ids(&hits), vec!["A", "B"]);
        assert!(hits[0].score >= hits[1].score);
        for hit in &hits {
            assert!((hit.debug.age_days - 1.0).abs() < 1e-4);
            assert!(hit.created_at.is_some());
            assert!(hit.debug.vector.abs() < f64::EPSILON);
        }
    }

    #[tokio::test]
    async fn test_vector_error_degrades_to_keyword_only() {
        let now = Utc::now();
        let (index, history) = seeded_stores(now).await;
        let searcher = searcher(index, history, Arc::new(FailingVector));
        let params = SearchParams {
            limit: 5,
            ..SearchParams::default()
        };

        let hits = searcher.search_at("revenue", &params, now).await.unwrap();
        let found: HashSet<&str> = ids(&hits).into_iter().collect();
        assert_eq!(found, HashSet::from(["A", "B"]));
    }

    #[tokio::test]
    async fn test_vector_timeout_degrades_to_keyword_only() {
        let now = Utc::now();
        let (index, history) = seeded_stores(now).await;
        let searcher = searcher(index, history, Arc::new(HangingVector));

        let hits = searcher
            .search_at("coffee", &SearchParams::default(), now)
            .await
            .unwrap();
        assert_eq!(ids(&hits), vec!["C"]);
    }

    #[tokio::test]
    async fn test_results_are_unique_and_bounded() {
        let now = Utc::now();
        let (index, history) = seeded_stores(now).await;
        let vector_hits = vec![
            VectorHit {
                id: "A".to_string(),
                memory: "quarterly revenue growth".to_string(),
                score: Some(0.92),
                created_at: Some(now.to_rfc3339()),
                updated_at: None,
            },
            VectorHit {
                id: "X".to_string(),
                memory: "sales pipeline review".to_string(),
                score: Some(0.61),
                created_at: Some(now.to_rfc3339()),
                updated_at: None,
            },
            VectorHit {
                id: "Y".to_string(),
                memory: "budget planning for next year".to_string(),
                score: Some(0.33),
                created_at: None,
                updated_at: None,
            },
        ];
        let searcher = searcher(index, history, Arc::new(FixedVector(vector_hits)));

        for limit in 1..=5 {
            let params = SearchParams {
                limit,
                ..SearchParams::default()
            };
            let hits = searcher.search_at("revenue growth", &params, now).await.unwrap();
            assert!(hits.len() <= limit);
            let unique: HashSet<&str> = ids(&hits).into_iter().collect();
            assert_eq!(unique.len(), hits.len());
        }

        let params = SearchParams {
            limit: 10,
            ..SearchParams::default()
        };
        let hits = searcher.search_at("revenue growth", &params, now).await.unwrap();
        assert_eq!(hits[0].id, "A");
        assert!((hits[0].debug.vector - 0.92).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_candidates_is_empty_not_error() {
        let now = Utc::now();
        let (index, history) = seeded_stores(now).await;
        let searcher = searcher(index, history, Arc::new(NoopVectorClient));

        let hits = searcher
            .search_at("submarine", &SearchParams::default(), now)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_params_are_rejected() {
        let now = Utc::now();
        let (index, history) = seeded_stores(now).await;
        let searcher = searcher(index, history, Arc::new(NoopVectorClient));
        let params = SearchParams {
            half_life_days: 0.0,
            ..SearchParams::default()
        };

        let result = searcher.search_at("revenue", &params, now).await;
        assert!(matches!(result, Err(MemoryError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_vector_hit_without_text_or_dates_is_completed() {
        let now = Utc::now();
        let (index, history) = seeded_stores(now).await;
        let bare: VectorHit = serde_json::from_str(r#"{"id": "A", "score": 0.9}"#).unwrap();
        let searcher = searcher(index, history, Arc::new(FixedVector(vec![bare])));

        let hits = searcher
            .search_at("revenue growth", &SearchParams::default(), now)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "A");
        assert_eq!(hits[0].memory, "quarterly revenue growth");
        assert!(hits[0].created_at.is_some());
        assert!((hits[0].debug.age_days - 1.0).abs() < 1e-9);
        assert!(hits.iter().all(|h| !h.memory.is_empty()));
    }

    #[test]
    fn test_hit_values_are_rounded_to_four_places() {
        let hit = SearchHit::from(Candidate {
            id: "m1".to_string(),
            text: "note".to_string(),
            vector_score: Some(0.876_543_21),
            bm25_score: Some(3.141_592_65),
            fused_score: 0.123_456_789,
            age_days: 1.234_56,
            decayed_score: 0.098_765_43,
            ..Candidate::default()
        });

        assert_eq!(hit.score.to_bits(), 0.0988_f64.to_bits());
        assert_eq!(hit.debug.vector.to_bits(), 0.8765_f64.to_bits());
        assert_eq!(hit.debug.bm25.to_bits(), 3.1416_f64.to_bits());
        assert_eq!(hit.debug.fused.to_bits(), 0.1235_f64.to_bits());
        assert_eq!(hit.debug.age_days.to_bits(), 1.2346_f64.to_bits());
        assert_eq!(hit.debug.decayed.to_bits(), 0.0988_f64.to_bits());
    }

    #[test]
    fn test_round4() {
        assert!((round4(0.123_456) - 0.1235).abs() < f64::EPSILON);
        assert!((round4(2.0) - 2.0).abs() < f64::EPSILON);
    }
}
