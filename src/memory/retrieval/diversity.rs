//! Maximal marginal relevance re-ranking over word-token Jaccard similarity.

use std::collections::HashSet;

use regex::Regex;

use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::retrieval::fusion::Candidate;

/// Greedy MMR selector.
#[derive(Clone, Debug)]
pub struct DiversityReranker {
    mmr_lambda: f64,
    word_pattern: Regex,
}

impl DiversityReranker {
    /// Create a re-ranker. `mmr_lambda` of 1.0 is pure relevance, 0.0 pure novelty.
    ///
    /// # Errors
    /// Returns an error if `mmr_lambda` is outside `[0, 1]`.
    pub fn new(mmr_lambda: f64) -> MemoryResult<Self> {
        if !(0.0..=1.0).contains(&mmr_lambda) {
            return Err(MemoryError::InvalidConfig(
                "mmr_lambda must be within [0, 1]".to_string(),
            ));
        }
        Ok(Self {
            mmr_lambda,
            word_pattern: Regex::new(r"\w+")?,
        })
    }

    /// Lowercased word tokens of `text`.
    #[must_use]
    pub fn tokenize(&self, text: &str) -> HashSet<String> {
        let lowered = text.to_lowercase();
        self.word_pattern
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Order `candidates` by decayed score and pick up to `limit` of them.
    ///
    /// The best-scoring candidate is always first. Each following pick maximizes
    /// `lambda * decayed - (1 - lambda) * max_similarity_to_picked`; ties go to the
    /// candidate that ranked higher by decayed score.
    #[must_use]
    pub fn rerank(&self, mut candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
        if limit == 0 || candidates.is_empty() {
            return Vec::new();
        }
        candidates.sort_by(|a, b| b.decayed_score.total_cmp(&a.decayed_score));

        let tokens: Vec<HashSet<String>> =
            candidates.iter().map(|c| self.tokenize(&c.text)).collect();
        let mut pool: Vec<usize> = (1..candidates.len()).collect();
        let mut picked: Vec<usize> = Vec::with_capacity(limit.min(candidates.len()));
        picked.push(0);

        while picked.len() < limit && !pool.is_empty() {
            let mut best_pos = 0;
            let mut best_score = f64::NEG_INFINITY;
            for (pos, &idx) in pool.iter().enumerate() {
                let redundancy = picked
                    .iter()
                    .map(|&chosen| jaccard(&tokens[idx], &tokens[chosen]))
                    .fold(0.0, f64::max);
                let score = self.mmr_lambda.mul_add(
                    candidates[idx].decayed_score,
                    -(1.0 - self.mmr_lambda) * redundancy,
                );
                if score > best_score {
                    best_score = score;
                    best_pos = pos;
                }
            }
            picked.push(pool.remove(best_pos));
        }

        let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
        picked
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect()
    }
}

/// Jaccard similarity of two token sets; 0 when both are empty.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, text: &str, decayed: f64) -> Candidate {
        Candidate {
            id: id.to_string(),
            text: text.to_string(),
            decayed_score: decayed,
            ..Candidate::default()
        }
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_rejects_lambda_out_of_range() {
        assert!(DiversityReranker::new(-0.1).is_err());
        assert!(DiversityReranker::new(1.1).is_err());
        assert!(DiversityReranker::new(f64::NAN).is_err());
        assert!(DiversityReranker::new(0.0).is_ok());
        assert!(DiversityReranker::new(1.0).is_ok());
    }

    #[test]
    fn test_tokenize_is_case_folded() {
        let reranker = DiversityReranker::new(0.7).unwrap();
        let tokens = reranker.tokenize("Likes GREEN tea, likes green-tea!");
        let expected: HashSet<String> = ["likes", "green", "tea"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_jaccard() {
        let reranker = DiversityReranker::new(0.7).unwrap();
        let a = reranker.tokenize("dark roast coffee");
        let b = reranker.tokenize("light roast coffee");
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-12);
        assert!(jaccard(&HashSet::new(), &HashSet::new()).abs() < f64::EPSILON);
    }

    #[test]
    fn test_distinct_text_beats_near_duplicate() {
        let reranker = DiversityReranker::new(0.5).unwrap();
        let candidates = vec![
            candidate("dup1", "user prefers dark roast coffee every morning", 0.9),
            candidate("dup2", "user prefers dark roast coffee each morning", 0.88),
            candidate("other", "flight to tokyo booked for june", 0.5),
        ];

        let top_k = ids(&candidates[..2]).join(",");
        assert_eq!(top_k, "dup1,dup2");

        let picked = reranker.rerank(candidates, 2);
        assert_eq!(ids(&picked), vec!["dup1", "other"]);
    }

    #[test]
    fn test_pure_relevance_keeps_score_order() {
        let reranker = DiversityReranker::new(1.0).unwrap();
        let candidates = vec![
            candidate("low", "same words here", 0.2),
            candidate("high", "same words here", 0.9),
            candidate("mid", "same words here", 0.5),
        ];
        let picked = reranker.rerank(candidates, 3);
        assert_eq!(ids(&picked), vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_ties_go_to_first_encountered() {
        let reranker = DiversityReranker::new(0.7).unwrap();
        let candidates = vec![
            candidate("a", "alpha", 0.8),
            candidate("b", "beta", 0.5),
            candidate("c", "gamma", 0.5),
        ];
        let picked = reranker.rerank(candidates, 2);
        assert_eq!(ids(&picked), vec!["a", "b"]);

        let candidates = vec![candidate("x", "one", 0.4), candidate("y", "two", 0.4)];
        let picked = reranker.rerank(candidates, 1);
        assert_eq!(ids(&picked), vec!["x"]);
    }

    #[test]
    fn test_limit_bounds() {
        let reranker = DiversityReranker::new(0.7).unwrap();
        let candidates = vec![candidate("a", "alpha", 0.8), candidate("b", "beta", 0.5)];

        assert!(reranker.rerank(candidates.clone(), 0).is_empty());
        assert!(reranker.rerank(Vec::new(), 5).is_empty());

        let picked = reranker.rerank(candidates, 10);
        assert_eq!(ids(&picked), vec!["a", "b"]);
    }
}
