//! Configuration for the memory search subsystem.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::memory::core::errors::{MemoryError, MemoryResult};

/// Environment variable overriding [`StorageConfig::sqlite_path`].
pub const ENV_DB_PATH: &str = "SMART_RECALL_DB";
/// Environment variable overriding [`VectorConfig::base_url`].
pub const ENV_VECTOR_URL: &str = "SMART_RECALL_VECTOR_URL";
/// Environment variable overriding [`VectorConfig::api_key`].
pub const ENV_VECTOR_API_KEY: &str = "SMART_RECALL_VECTOR_API_KEY";
/// Environment variable overriding [`VectorConfig::timeout_ms`].
pub const ENV_VECTOR_TIMEOUT_MS: &str = "SMART_RECALL_VECTOR_TIMEOUT_MS";
/// Environment variable overriding [`VectorConfig::user_id`].
pub const ENV_USER_ID: &str = "MEM0_USER_ID";

/// Top-level configuration for the memory engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Default search knobs.
    pub search: SearchConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Vector backend settings.
    pub vector: VectorConfig,
}

impl MemoryConfig {
    /// Load a configuration from a JSON file. Missing sections keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: &Path) -> MemoryResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Layer values from the process environment on top of this configuration.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Layer values from `lookup` on top of this configuration.
    ///
    /// Unparsable numeric values are ignored.
    #[must_use]
    pub fn apply_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            self.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(url) = lookup(ENV_VECTOR_URL).filter(|v| !v.is_empty()) {
            self.vector.base_url = Some(url);
        }
        if let Some(key) = lookup(ENV_VECTOR_API_KEY).filter(|v| !v.is_empty()) {
            self.vector.api_key = Some(key);
        }
        if let Some(timeout) = lookup(ENV_VECTOR_TIMEOUT_MS).and_then(|v| v.parse().ok()) {
            self.vector.timeout_ms = timeout;
        }
        if let Some(user_id) = lookup(ENV_USER_ID).filter(|v| !v.is_empty()) {
            self.vector.user_id = user_id;
        }
        self
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> MemoryResult<()> {
        self.search.default_params().validate()?;

        if self.search.limit == 0 {
            return Err(MemoryError::InvalidConfig(
                "search.limit must be > 0".to_string(),
            ));
        }

        for (field, name) in [
            ("storage.history_table", &self.storage.history_table),
            ("storage.fts_table", &self.storage.fts_table),
        ] {
            if !is_sql_identifier(name) {
                return Err(MemoryError::InvalidConfig(format!(
                    "{field} must be a plain SQL identifier, got {name:?}"
                )));
            }
        }

        if self.storage.history_table == self.storage.fts_table {
            return Err(MemoryError::InvalidConfig(
                "storage.history_table and storage.fts_table must differ".to_string(),
            ));
        }

        if self.vector.timeout_ms == 0 {
            return Err(MemoryError::InvalidConfig(
                "vector.timeout_ms must be > 0".to_string(),
            ));
        }

        if let Some(base_url) = &self.vector.base_url {
            Url::parse(base_url)?;
        }

        Ok(())
    }
}

/// Default search knobs, overridable per query.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of results to return.
    pub limit: usize,
    /// Weight of the normalized vector score.
    pub vector_weight: f64,
    /// Weight of the normalized BM25 score.
    pub text_weight: f64,
    /// Half-life of the recency decay, in days.
    pub half_life_days: f64,
    /// Relevance/diversity tradeoff for MMR (1.0 = pure relevance).
    pub mmr_lambda: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            vector_weight: 0.7,
            text_weight: 0.3,
            half_life_days: 30.0,
            mmr_lambda: 0.7,
        }
    }
}

impl SearchConfig {
    /// Per-query parameters seeded from these defaults.
    #[must_use]
    pub const fn default_params(&self) -> SearchParams {
        SearchParams {
            limit: self.limit,
            vector_weight: self.vector_weight,
            text_weight: self.text_weight,
            half_life_days: self.half_life_days,
            mmr_lambda: self.mmr_lambda,
        }
    }
}

/// Parameters for a single search call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Maximum number of results.
    pub limit: usize,
    /// Weight of the normalized vector score.
    pub vector_weight: f64,
    /// Weight of the normalized BM25 score.
    pub text_weight: f64,
    /// Half-life of the recency decay, in days.
    pub half_life_days: f64,
    /// Relevance/diversity tradeoff for MMR.
    pub mmr_lambda: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchConfig::default().default_params()
    }
}

impl SearchParams {
    /// Validate the numeric knobs.
    ///
    /// # Errors
    /// Returns an error if a weight is not finite, the half-life is not strictly
    /// positive, or `mmr_lambda` falls outside `[0, 1]`.
    pub fn validate(&self) -> MemoryResult<()> {
        if !self.vector_weight.is_finite() || !self.text_weight.is_finite() {
            return Err(MemoryError::InvalidConfig(
                "vector_weight and text_weight must be finite".to_string(),
            ));
        }
        if self.half_life_days.is_nan() || self.half_life_days <= 0.0 {
            return Err(MemoryError::InvalidConfig(
                "half_life_days must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(MemoryError::InvalidConfig(
                "mmr_lambda must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database holding the history log and the keyword index.
    pub sqlite_path: PathBuf,
    /// History (audit log) table name.
    pub history_table: String,
    /// FTS5 keyword index table name.
    pub fts_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/mem0_history.db"),
            history_table: "history".to_string(),
            fts_table: "memory_fts".to_string(),
        }
    }
}

/// Vector backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Base URL of the memory service. `None` runs keyword-only.
    pub base_url: Option<String>,
    /// User scope passed to the memory service.
    pub user_id: String,
    /// Optional API key sent as `Authorization: Token <key>`.
    pub api_key: Option<String>,
    /// Upper bound on a single vector search call, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user_id: "default_user".to_string(),
            api_key: None,
            timeout_ms: 10_000,
        }
    }
}

impl VectorConfig {
    /// Timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Whether `name` can be interpolated into SQL as a bare identifier.
#[must_use]
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
