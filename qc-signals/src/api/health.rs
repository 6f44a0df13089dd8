//! Health check endpoint
//!
//! Always answers 200; monitoring reads `status` from the body.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::db::count_signals;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    /// Signal store unreadable, or the last contribution lookup failed
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub module: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    /// Rows in the signals table; `null` when it cannot be read
    pub signal_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;

    let signal_count = count_signals(&state.db, None)
        .await
        .inspect_err(|e| warn!(error = %e, "Health check could not count signals"))
        .ok();
    let last_error = state.last_error.read().await.clone();

    let status = if signal_count.is_some() && last_error.is_none() {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    };

    Json(HealthResponse {
        status,
        module: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        signal_count,
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
