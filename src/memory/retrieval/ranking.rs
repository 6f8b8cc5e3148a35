//! Recency discounting of fused scores.

use chrono::{DateTime, Utc};

use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::record::parse_timestamp;
use crate::memory::retrieval::fusion::Candidate;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Exponential half-life decay.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TemporalDecay {
    lambda: f64,
}

impl TemporalDecay {
    /// Build a decay stage whose factor halves every `half_life_days`.
    ///
    /// # Errors
    /// Returns an error unless `half_life_days` is strictly positive.
    pub fn new(half_life_days: f64) -> MemoryResult<Self> {
        if half_life_days.is_nan() || half_life_days <= 0.0 {
            return Err(MemoryError::InvalidConfig(
                "half_life_days must be > 0".to_string(),
            ));
        }
        Ok(Self {
            lambda: std::f64::consts::LN_2 / half_life_days,
        })
    }

    /// Decay constant `ln(2) / half_life_days`.
    #[must_use]
    pub const fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Multiplier for a memory `age_days` old.
    #[must_use]
    pub fn factor(&self, age_days: f64) -> f64 {
        (-self.lambda * age_days).exp()
    }

    /// Set `age_days` and `decayed_score` on every candidate, relative to `now`.
    pub fn apply(&self, candidates: &mut [Candidate], now: DateTime<Utc>) {
        for candidate in candidates {
            candidate.age_days = age_in_days(
                candidate.updated_at.as_deref(),
                candidate.created_at.as_deref(),
                now,
            );
            candidate.decayed_score = candidate.fused_score * self.factor(candidate.age_days);
        }
    }
}

/// Age of a record in days.
///
/// Uses `updated_at` when present, else `created_at`. Missing or unparseable timestamps
/// and timestamps in the future give 0.
#[must_use]
#[allow(clippy::cast_precision_loss)] // Millisecond ages fit comfortably in f64
pub fn age_in_days(updated_at: Option<&str>, created_at: Option<&str>, now: DateTime<Utc>) -> f64 {
    let raw = updated_at
        .filter(|s| !s.trim().is_empty())
        .or_else(|| created_at.filter(|s| !s.trim().is_empty()));
    let Some(ts) = raw.and_then(parse_timestamp) else {
        return 0.0;
    };
    let millis = now.signed_duration_since(ts).num_milliseconds().max(0);
    millis as f64 / 1000.0 / SECONDS_PER_DAY
}
