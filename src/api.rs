use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::aggregate::{aggregate_from_store, AggregateView, Table};
use crate::error::StoreError;
use crate::insight::Category;
use crate::metrics::Metrics;
use crate::rank::{rank_from_store, summarize_by_category, CategorySummary, PriorityScore, ValidationLookup};
use crate::store::{FailureMarker, InsightFilter, InsightStore, StoreStats};

/// Read side shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InsightStore>,
    pub validation: Arc<dyn ValidationLookup>,
}

impl AppState {
    pub fn new(store: Arc<dyn InsightStore>, validation: Arc<dyn ValidationLookup>) -> Self {
        Self { store, validation }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/rank", get(rank))
        .route("/rank/summary", get(rank_summary))
        .route("/aggregate/{view}", get(aggregate))
        .route("/stats", get(stats))
        .route("/failures", get(failures))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// `router` plus `/metrics`.
pub fn router_with_metrics(state: AppState, metrics: &Metrics) -> Router {
    router(state).merge(metrics.router())
}

/// Query string accepted by `/rank` and `/aggregate/{view}`.
#[derive(Debug, Default, Deserialize)]
struct FilterQuery {
    category: Option<Category>,
    source: Option<String>,
    min_frustration: Option<u8>,
    #[serde(default)]
    wtp_only: bool,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

impl FilterQuery {
    fn filter(&self) -> InsightFilter {
        InsightFilter {
            category: self.category,
            source: self.source.clone(),
            min_frustration: self.min_frustration,
            wtp_only: self.wtp_only,
            since: self.since,
            until: self.until,
        }
    }
}

enum ApiError {
    NotFound(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Store(e) => {
                tracing::error!(target: "store", error = %e, "store read failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": msg }))).into_response()
    }
}

async fn rank(
    State(state): State<AppState>,
    Query(q): Query<FilterQuery>,
) -> Result<Json<Vec<PriorityScore>>, ApiError> {
    let mut scores = rank_from_store(
        state.store.as_ref(),
        &q.filter(),
        state.validation.as_ref(),
        Utc::now(),
    )
    .await?;
    if let Some(limit) = q.limit {
        scores.truncate(limit);
    }
    Ok(Json(scores))
}

async fn rank_summary(
    State(state): State<AppState>,
    Query(q): Query<FilterQuery>,
) -> Result<Json<Vec<CategorySummary>>, ApiError> {
    let scores = rank_from_store(
        state.store.as_ref(),
        &q.filter(),
        state.validation.as_ref(),
        Utc::now(),
    )
    .await?;
    Ok(Json(summarize_by_category(&scores)))
}

async fn aggregate(
    State(state): State<AppState>,
    Path(view): Path<String>,
    Query(q): Query<FilterQuery>,
) -> Result<Json<Table>, ApiError> {
    let view: AggregateView = view.parse().map_err(ApiError::NotFound)?;
    let mut table = aggregate_from_store(state.store.as_ref(), view, &q.filter()).await?;
    if let Some(limit) = q.limit {
        table.rows.truncate(limit);
    }
    Ok(Json(table))
}

async fn stats(State(state): State<AppState>) -> Result<Json<StoreStats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}

async fn failures(State(state): State<AppState>) -> Result<Json<Vec<FailureMarker>>, ApiError> {
    Ok(Json(state.store.failures().await?))
}
