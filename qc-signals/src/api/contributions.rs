//! Hierarchical contribution endpoints

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::error;

use super::signals::require_signal;
use crate::services::{to_response, ContributionResponse, HierarchicalContributionsResponse, SortField};
use crate::{ApiError, ApiResult, AppState};

const MAX_TOP_N: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ContributionsQuery {
    /// Downward edges to return (1..=50)
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Re-rank downward edges by impact instead of contribution rank
    pub sort_by: Option<SortField>,
}

fn default_top_n() -> usize {
    10
}

fn validate_top_n(top_n: usize) -> ApiResult<usize> {
    if (1..=MAX_TOP_N).contains(&top_n) {
        Ok(top_n)
    } else {
        Err(ApiError::BadRequest(format!("top_n must be between 1 and {}", MAX_TOP_N)))
    }
}

/// GET /api/signals/:id/contributions
pub async fn get_signal_contributions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ContributionsQuery>,
) -> ApiResult<Json<HierarchicalContributionsResponse>> {
    let top_n = validate_top_n(query.top_n)?;
    let signal = require_signal(&state, &id).await?;

    if signal.facility_id.is_none() {
        return Err(ApiError::NotFound(format!("No facility_id available for signal: {}", signal.guid)));
    }

    let result = match query.sort_by {
        None => state.contributions.hierarchy_for(&signal, top_n).await,
        Some(sort_by) => state
            .contributions
            .hierarchy_for(&signal, usize::MAX)
            .await
            .map(|h| h.rerank(top_n, sort_by)),
    };

    match result {
        Ok(hierarchy) => Ok(Json(HierarchicalContributionsResponse::from(&hierarchy))),
        Err(e) => {
            error!(signal = %signal.guid, parent_node_id = ?e.parent_node_id, error = %e, "Contribution lookup failed");
            *state.last_error.write().await = Some(e.to_string());
            Err(e.into())
        }
    }
}

/// GET /api/contributions/top
pub async fn get_top_contributors(
    State(state): State<AppState>,
    Query(query): Query<ContributionsQuery>,
) -> ApiResult<Json<Vec<ContributionResponse>>> {
    let top_n = validate_top_n(query.top_n)?;
    let records = state.contributions.top_contributors_global(top_n as u32).await;
    Ok(Json(records.iter().map(to_response).collect()))
}

/// Build contribution routes
pub fn contribution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/signals/:id/contributions", get(get_signal_contributions))
        .route("/api/contributions/top", get(get_top_contributors))
}
