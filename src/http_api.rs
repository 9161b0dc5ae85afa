//! Thin axum composition surface over the markets cache facade (§6's "CLI
//! surface" collaborator, realized here as the minimal HTTP plumbing the
//! core needs to be reachable at all).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;

use crate::markets::{join_page_blob, CacheStatus, MarketsCacheFacade};

#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<MarketsCacheFacade>,
    pub prometheus: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v3/coins/markets", get(markets))
        .route("/api/v3/top_ids", get(top_ids))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct MarketsQuery {
    ids: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

fn cache_status_header(status: CacheStatus) -> &'static str {
    match status {
        CacheStatus::Full => "full",
        CacheStatus::Partial => "partial",
        CacheStatus::Miss => "miss",
    }
}

/// Serves `coins/markets`-shaped queries straight out of cache: `ids` takes
/// priority, otherwise falls back to `page`/`per_page` as a single-page
/// lookup. Never calls upstream — a miss here is reported as such, not
/// silently fetched (§4.7's read-only contract).
async fn markets(State(state): State<AppState>, Query(params): Query<MarketsQuery>) -> Response {
    let (status, records) = if let Some(ids) = params.ids {
        let ids: Vec<String> = ids.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        match state.facade.by_ids(&ids).await {
            Ok(result) => result,
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    } else {
        let page = params.page.unwrap_or(1);
        match state.facade.by_page(page, page).await {
            Ok(result) => result,
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    };

    let _ = params.per_page;
    let body = join_page_blob(&records);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (HeaderName::from_static("x-cache-status"), cache_status_header(status).to_string()),
        ],
        body,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct TopIdsQuery {
    limit: Option<usize>,
}

async fn top_ids(State(state): State<AppState>, Query(params): Query<TopIdsQuery>) -> Response {
    let ids = state.facade.top_market_ids(params.limit.unwrap_or(0));
    axum::Json(ids).into_response()
}
