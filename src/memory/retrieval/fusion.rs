//! Candidate merging, per-family score normalization and weighted fusion.

use std::collections::HashMap;

use crate::memory::retrieval::vector_client::VectorHit;
use crate::memory::storage::keyword_index::KeywordHit;

/// Multiplier applied to the final limit when fetching from each source.
pub const OVERFETCH_FACTOR: usize = 3;
/// Lower bound on the per-source fetch size.
pub const MIN_FETCH: usize = 15;

/// Number of candidates to request from each source for a final `limit`.
#[must_use]
pub fn overfetch_limit(limit: usize) -> usize {
    limit.saturating_mul(OVERFETCH_FACTOR).max(MIN_FETCH)
}

/// A memory under consideration for one query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Candidate {
    /// Memory id, unique within one query's candidate set.
    pub id: String,
    /// Memory text.
    pub text: String,
    /// Creation timestamp as reported by the source.
    pub created_at: Option<String>,
    /// Last update timestamp as reported by the source.
    pub updated_at: Option<String>,
    /// Raw vector similarity; `None` when only matched lexically.
    pub vector_score: Option<f64>,
    /// Raw BM25 score; `None` when only matched by vector search.
    pub bm25_score: Option<f64>,
    /// Vector score after min-max scaling.
    pub norm_vector: f64,
    /// BM25 score after max scaling.
    pub norm_bm25: f64,
    /// Weighted combination of the normalized scores.
    pub fused_score: f64,
    /// Age in days used for decay.
    pub age_days: f64,
    /// Fused score discounted by age.
    pub decayed_score: f64,
}

impl Candidate {
    /// Whether this candidate came only from the keyword index.
    #[must_use]
    pub const fn is_keyword_only(&self) -> bool {
        self.vector_score.is_none()
    }
}

/// Weights applied to the normalized score families.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FusionWeights {
    /// Weight of the vector family.
    pub vector: f64,
    /// Weight of the BM25 family.
    pub text: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            text: 0.3,
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Merge both source lists by id.
///
/// Vector hits come first, in their order; keyword-only hits follow in theirs. A memory
/// found by both sources keeps the vector text and timestamps and carries both scores;
/// empty vector text is replaced by the indexed text. Hits without an id are dropped and
/// repeated ids within one source keep the first hit.
#[must_use]
pub fn merge_candidates(vector_hits: Vec<VectorHit>, keyword_hits: Vec<KeywordHit>) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> =
        Vec::with_capacity(vector_hits.len() + keyword_hits.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for hit in vector_hits {
        if hit.id.is_empty() || positions.contains_key(&hit.id) {
            continue;
        }
        positions.insert(hit.id.clone(), candidates.len());
        candidates.push(Candidate {
            id: hit.id,
            text: hit.memory,
            created_at: hit.created_at,
            updated_at: hit.updated_at,
            vector_score: Some(finite_or_zero(hit.score.unwrap_or(0.0))),
            ..Candidate::default()
        });
    }

    for hit in keyword_hits {
        if hit.id.is_empty() {
            continue;
        }
        let score = finite_or_zero(hit.score);
        match positions.get(&hit.id) {
            Some(&pos) => {
                let candidate = &mut candidates[pos];
                if candidate.bm25_score.is_none() {
                    candidate.bm25_score = Some(score);
                }
                if candidate.text.is_empty() {
                    candidate.text = hit.text;
                }
            }
            None => {
                positions.insert(hit.id.clone(), candidates.len());
                candidates.push(Candidate {
                    id: hit.id,
                    text: hit.text,
                    bm25_score: Some(score),
                    ..Candidate::default()
                });
            }
        }
    }

    candidates
}

/// Min-max scale `values` into `[0, 1]`. A zero spread maps every value to 0.
#[must_use]
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let Some(lo) = values.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let hi = values.iter().copied().fold(lo, f64::max);
    let spread = hi - lo;
    if spread <= 0.0 {
        return vec![0.0; values.len()];
    }
    values
        .iter()
        .map(|v| ((v - lo) / spread).clamp(0.0, 1.0))
        .collect()
}

/// Scale `values` by their maximum. A non-positive maximum maps every value to 0.
#[must_use]
pub fn max_normalize(values: &[f64]) -> Vec<f64> {
    let hi = values.iter().copied().fold(0.0, f64::max);
    if hi <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v / hi).clamp(0.0, 1.0)).collect()
}

/// Normalize both score families across the candidate set and compute the fused score.
pub fn fuse(candidates: &mut [Candidate], weights: FusionWeights) {
    let vector_raw: Vec<f64> = candidates
        .iter()
        .map(|c| c.vector_score.unwrap_or(0.0))
        .collect();
    let bm25_raw: Vec<f64> = candidates
        .iter()
        .map(|c| c.bm25_score.unwrap_or(0.0))
        .collect();

    let vector_norm = min_max_normalize(&vector_raw);
    let bm25_norm = max_normalize(&bm25_raw);

    for ((candidate, vector), bm25) in candidates.iter_mut().zip(vector_norm).zip(bm25_norm) {
        candidate.norm_vector = vector;
        candidate.norm_bm25 = bm25;
        candidate.fused_score = weights.vector.mul_add(vector, weights.text * bm25);
    }
}
