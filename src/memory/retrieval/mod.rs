//! Retrieval pipeline: candidate fetch, fusion, temporal decay and diversity re-ranking.

pub mod diversity;
pub mod fusion;
pub mod hybrid_search;
pub mod ranking;
pub mod vector_client;

pub use diversity::{DiversityReranker, jaccard};
pub use fusion::{Candidate, FusionWeights, fuse, merge_candidates, overfetch_limit};
pub use hybrid_search::{HybridSearcher, ScoreBreakdown, SearchHit, SearchResponse, round4};
pub use ranking::{TemporalDecay, age_in_days};
pub use vector_client::{Mem0HttpClient, NoopVectorClient, VectorHit, VectorSearchClient};
