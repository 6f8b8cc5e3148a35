//! HTTP route handlers for the memory search API.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::memory::core::errors::MemoryError;
use crate::memory::core::record::AddEvents;
use crate::memory::engine::{MemoryListing, RebuildReport};
use crate::memory::retrieval::SearchResponse;

use super::state::AppState;

/// Default number of memories returned by the listing route.
const DEFAULT_LIST_LIMIT: usize = 100;

type ApiError = (StatusCode, String);

fn api_error(err: &MemoryError) -> ApiError {
    let status = match err {
        MemoryError::InvalidConfig(_) | MemoryError::InvalidRecord(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/search", post(memory_search))
        .route("/api/index", post(index_memories))
        .route("/api/index/rebuild", post(rebuild_index))
        .route("/api/memories", get(list_memories))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "smart-recall",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Search request. Omitted knobs fall back to the configured defaults.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    /// The search query.
    pub query: String,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Weight of the vector score.
    pub vector_weight: Option<f64>,
    /// Weight of the BM25 score.
    pub text_weight: Option<f64>,
    /// Recency half-life in days.
    pub half_life_days: Option<f64>,
    /// MMR relevance/diversity tradeoff.
    pub mmr_lambda: Option<f64>,
}

/// Handle memory search requests.
async fn memory_search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let mut params = state.engine.config().search.default_params();
    if let Some(limit) = request.limit {
        params.limit = limit;
    }
    if let Some(weight) = request.vector_weight {
        params.vector_weight = weight;
    }
    if let Some(weight) = request.text_weight {
        params.text_weight = weight;
    }
    if let Some(days) = request.half_life_days {
        params.half_life_days = days;
    }
    if let Some(lambda) = request.mmr_lambda {
        params.mmr_lambda = lambda;
    }

    let response = state
        .engine
        .search(&request.query, Some(params))
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(response))
}

/// Index request: one memory, or the result of an add call on the memory store.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IndexRequest {
    /// A single memory.
    Single {
        /// Memory id.
        id: String,
        /// Memory text.
        memory: String,
    },
    /// Add-call events.
    Events(AddEvents),
}

/// Index response.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexResponse {
    /// Number of memories written to the keyword index.
    pub indexed: usize,
}

/// Handle index requests. Indexing is best-effort and never fails the request.
async fn index_memories(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IndexRequest>,
) -> Json<IndexResponse> {
    let indexed = match request {
        IndexRequest::Single { id, memory } => {
            usize::from(state.engine.index_single(&id, &memory).await)
        }
        IndexRequest::Events(events) => {
            state
                .engine
                .index_add_events(&events.into_events())
                .await
        }
    };
    Json(IndexResponse { indexed })
}

/// Handle keyword index rebuilds.
async fn rebuild_index(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RebuildReport>, ApiError> {
    let report = state
        .engine
        .rebuild_index()
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(report))
}

/// Listing query string.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Maximum number of memories.
    pub limit: Option<usize>,
}

/// Handle memory listing requests.
async fn list_memories(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<MemoryListing>, ApiError> {
    let listing = state
        .engine
        .list_memories(params.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(listing))
}
