//! Signal read model, workflow updates and technical details

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use qc_common::db::{Signal, SignalDomain, WorkflowStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{list_signals, load_signal, update_workflow, SignalFilter, SignalPage, WorkflowUpdate};
use crate::pagination::PageRequest;
use crate::services::TechnicalDetails;
use crate::{ApiError, ApiResult, AppState};

/// Query parameters for the signal list
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// 1-indexed; defaults to the first page
    pub page: Option<i64>,
    /// Defaults to 50, at most 200
    pub page_size: Option<i64>,
    pub facility_id: Option<String>,
    pub metric_id: Option<String>,
    pub domain: Option<SignalDomain>,
    pub workflow_status: Option<WorkflowStatus>,
}

#[derive(Debug, Serialize)]
pub struct SignalListResponse {
    pub signals: Vec<Signal>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub has_next: bool,
}

/// Temporal drill-down of one signal
#[derive(Debug, Serialize)]
pub struct SignalTemporalResponse {
    pub signal_id: Uuid,
    pub temporal_node_id: Option<String>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub slope_percentile: Option<Decimal>,
    pub monthly_z_scores: Option<Value>,
}

pub(crate) fn parse_signal_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid signal id: {}", raw)))
}

pub(crate) async fn require_signal(state: &AppState, raw_id: &str) -> ApiResult<Signal> {
    let id = parse_signal_id(raw_id)?;
    load_signal(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Signal not found: {}", id)))
}

/// GET /api/signals
pub async fn get_signals(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<SignalListResponse>> {
    let filter = SignalFilter {
        facility_id: query.facility_id,
        metric_id: query.metric_id,
        domain: query.domain,
        workflow_status: query.workflow_status,
    };
    let request = PageRequest::new(query.page, query.page_size);
    let SignalPage { signals, window } = list_signals(&state.db, &filter, request).await?;

    Ok(Json(SignalListResponse {
        signals,
        total: window.total,
        page: window.page,
        page_size: window.page_size,
        total_pages: window.total_pages,
        has_next: window.has_next(),
    }))
}

/// GET /api/signals/:id
pub async fn get_signal(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Signal>> {
    Ok(Json(require_signal(&state, &id).await?))
}

/// PATCH /api/signals/:id
///
/// Workflow fields only; the importer never writes them.
pub async fn patch_signal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<WorkflowUpdate>,
) -> ApiResult<Json<Signal>> {
    let id = parse_signal_id(&id)?;
    let signal = update_workflow(&state.db, id, &update)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Signal not found: {}", id)))?;

    info!(signal = %id, status = %signal.workflow_status.as_str(), "Workflow updated");
    Ok(Json(signal))
}

/// GET /api/signals/:id/technical-details
pub async fn get_technical_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TechnicalDetails>> {
    let signal = require_signal(&state, &id).await?;

    state
        .technical_details
        .details(&signal.canonical_node_id, Some(&signal.entity_dimensions_hash))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Technical details not found in fct_signals".to_string()))
}

/// GET /api/signals/:id/temporal
///
/// Slope percentile and monthly z-scores are read from the mart on demand.
pub async fn get_temporal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SignalTemporalResponse>> {
    let signal = require_signal(&state, &id).await?;

    let mut response = SignalTemporalResponse {
        signal_id: signal.guid,
        temporal_node_id: signal.temporal_node_id.clone(),
        slope_percentile: None,
        monthly_z_scores: None,
    };

    if signal.temporal_node_id.is_some() {
        match state
            .technical_details
            .details(&signal.canonical_node_id, Some(&signal.entity_dimensions_hash))
            .await
        {
            Ok(Some(details)) => {
                response.slope_percentile = details.slope_percentile;
                response.monthly_z_scores = details.monthly_z_scores;
            }
            Ok(None) => {}
            Err(e) => warn!(signal = %signal.guid, error = %e, "Temporal details unavailable"),
        }
    }

    Ok(Json(response))
}

/// Build signal routes
pub fn signal_routes() -> Router<AppState> {
    Router::new()
        .route("/api/signals", get(get_signals))
        .route("/api/signals/:id", get(get_signal).patch(patch_signal))
        .route("/api/signals/:id/technical-details", get(get_technical_details))
        .route("/api/signals/:id/temporal", get(get_temporal))
}
