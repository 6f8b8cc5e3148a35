//! Client side of the external vector memory store's similarity search.

use std::future::Future;
use std::pin::Pin;

use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory::core::config::VectorConfig;
use crate::memory::core::errors::{MemoryError, MemoryResult};

/// Boxed future type for vector search calls.
pub type SearchFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One similarity hit. Every field tolerates absence in the wire payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorHit {
    /// Memory id.
    pub id: String,
    /// Memory text.
    pub memory: String,
    /// Relevance score, higher is better, not necessarily normalized.
    pub score: Option<f64>,
    /// Creation timestamp.
    pub created_at: Option<String>,
    /// Last update timestamp.
    pub updated_at: Option<String>,
}

/// Vector similarity search abstraction.
pub trait VectorSearchClient: Send + Sync {
    /// Search for memories similar to `query`.
    ///
    /// # Errors
    /// Returns an error if the backend is unreachable or answers with a failure.
    fn search(&self, query: &str, limit: usize) -> SearchFuture<'_, MemoryResult<Vec<VectorHit>>>;
}

/// Vector client for keyword-only deployments. Never returns hits.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopVectorClient;

impl VectorSearchClient for NoopVectorClient {
    fn search(&self, _query: &str, _limit: usize) -> SearchFuture<'_, MemoryResult<Vec<VectorHit>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    user_id: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchEnvelope {
    Wrapped {
        #[serde(default)]
        results: Vec<VectorHit>,
    },
    Bare(Vec<VectorHit>),
}

impl SearchEnvelope {
    fn into_hits(self) -> Vec<VectorHit> {
        match self {
            Self::Wrapped { results } | Self::Bare(results) => results,
        }
    }
}

/// HTTP client for a mem0-compatible memory service (`POST {base_url}/search`).
#[derive(Clone, Debug)]
pub struct Mem0HttpClient {
    http: ReqwestClient,
    search_url: String,
    user_id: String,
    api_key: Option<String>,
}

impl Mem0HttpClient {
    /// Build a client from config.
    ///
    /// # Errors
    /// Returns an error if no base URL is configured, it does not parse, or the HTTP
    /// client cannot be built.
    pub fn new(config: &VectorConfig) -> MemoryResult<Self> {
        let base_url = config.base_url.as_deref().ok_or_else(|| {
            MemoryError::InvalidConfig("vector.base_url is required for HTTP search".to_string())
        })?;
        url::Url::parse(base_url)?;

        let http = ReqwestClient::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            http,
            search_url: format!("{}/search", base_url.trim_end_matches('/')),
            user_id: config.user_id.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Endpoint used for searches.
    #[must_use]
    pub fn search_url(&self) -> &str {
        &self.search_url
    }
}

impl VectorSearchClient for Mem0HttpClient {
    fn search(&self, query: &str, limit: usize) -> SearchFuture<'_, MemoryResult<Vec<VectorHit>>> {
        let query = query.to_string();
        Box::pin(async move {
            let body = SearchRequest {
                query: &query,
                user_id: &self.user_id,
                limit,
            };
            let mut request = self.http.post(&self.search_url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.header(reqwest::header::AUTHORIZATION, format!("Token {key}"));
            }

            let response = request.send().await?.error_for_status()?;
            let envelope: SearchEnvelope = response.json().await?;
            let hits = envelope.into_hits();
            debug!(hits = hits.len(), "Vector search returned");
            Ok(hits)
        })
    }
}
