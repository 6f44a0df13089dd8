//! qc-signals library - signal consolidation and hierarchical contributions
//!
//! Imports externally computed signals into the canonical `signals` table and
//! serves them, together with their attribution edges and statistical
//! payload, over HTTP.

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;
pub mod pagination;
pub mod services;
pub mod sources;

pub use crate::error::{ApiError, ApiResult};

use crate::services::{ContributionService, TechnicalDetailsService};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Canonical signal store
    pub db: SqlitePool,
    pub contributions: Arc<ContributionService>,
    pub technical_details: Arc<TechnicalDetailsService>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last contribution-source failure, reported by /health
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        contributions: ContributionService,
        technical_details: TechnicalDetailsService,
    ) -> Self {
        Self {
            db,
            contributions: Arc::new(contributions),
            technical_details: Arc::new(technical_details),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::signal_routes())
        .merge(api::contribution_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
