//! Test Helper Utilities
//!
//! Shared seeding for the qc-signals integration tests. The application
//! tables and the marts live in the same in-memory database.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use qc_common::db::{create_signals_table, Signal, SignalDomain, WorkflowStatus};
use qc_common::identity::EMPTY_DIMENSIONS_HASH;
use qc_signals::sources::schema::create_mart_tables;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

pub const DETECTED_AT: &str = "2025-12-10T17:02:10Z";

/// Single-connection in-memory database with every table
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    create_signals_table(&pool).await.expect("signals table");
    create_mart_tables(&pool).await.expect("mart tables");
    pool
}

/// One `fct_signals` row
#[derive(Debug, Clone)]
pub struct MartSignal {
    pub run_id: Option<String>,
    pub canonical_node_id: Option<String>,
    pub metric_id: String,
    pub facility_id: Option<String>,
    pub service_line: Option<String>,
    pub sub_service_line: Option<String>,
    pub metric_value: Option<String>,
    pub domain: Option<String>,
    pub entity_dimensions: Option<String>,
    pub temporal_node_id: Option<String>,
    pub simple_zscore: Option<String>,
    pub slope_percentile: Option<String>,
    pub detected_at: Option<String>,
    pub dbt_updated_at: Option<String>,
}

impl MartSignal {
    pub fn new(node: &str, facility_id: &str) -> Self {
        Self {
            run_id: Some("run-1".to_string()),
            canonical_node_id: Some(node.to_string()),
            metric_id: "losIndex".to_string(),
            facility_id: Some(facility_id.to_string()),
            service_line: None,
            sub_service_line: None,
            metric_value: Some("1.25".to_string()),
            domain: Some("Efficiency".to_string()),
            entity_dimensions: None,
            temporal_node_id: None,
            simple_zscore: None,
            slope_percentile: None,
            detected_at: Some(DETECTED_AT.to_string()),
            dbt_updated_at: None,
        }
    }

    pub fn service_line(mut self, service_line: &str) -> Self {
        self.service_line = Some(service_line.to_string());
        self
    }

    pub fn dimensions(mut self, json: &str) -> Self {
        self.entity_dimensions = Some(json.to_string());
        self
    }
}

pub async fn insert_mart_signal(pool: &SqlitePool, s: &MartSignal) {
    sqlx::query(
        r#"
        INSERT INTO fct_signals (run_id, canonical_node_id, metric_id, facility_id, service_line,
                                 sub_service_line, metric_value, domain, entity_dimensions,
                                 temporal_node_id, simple_zscore, slope_percentile,
                                 detected_at, dbt_updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&s.run_id)
    .bind(&s.canonical_node_id)
    .bind(&s.metric_id)
    .bind(&s.facility_id)
    .bind(&s.service_line)
    .bind(&s.sub_service_line)
    .bind(&s.metric_value)
    .bind(&s.domain)
    .bind(&s.entity_dimensions)
    .bind(&s.temporal_node_id)
    .bind(&s.simple_zscore)
    .bind(&s.slope_percentile)
    .bind(&s.detected_at)
    .bind(&s.dbt_updated_at)
    .execute(pool)
    .await
    .expect("insert fct_signals row");
}

/// One `fct_contributions` row
#[derive(Debug, Clone)]
pub struct Edge {
    pub parent_node_id: String,
    pub parent_facility_id: String,
    pub parent_service_line: Option<String>,
    pub child_facility_id: String,
    pub child_service_line: Option<String>,
    pub child_sub_service_line: Option<String>,
    pub metric_id: String,
    pub child_value: f64,
    pub parent_value: f64,
    pub weight_share: f64,
    pub excess_over_parent: f64,
    pub contribution_weight: f64,
    pub contribution_rank: i64,
}

impl Edge {
    pub fn new(parent_node_id: &str, facility_id: &str, rank: i64) -> Self {
        Self {
            parent_node_id: parent_node_id.to_string(),
            parent_facility_id: facility_id.to_string(),
            parent_service_line: None,
            child_facility_id: facility_id.to_string(),
            child_service_line: None,
            child_sub_service_line: None,
            metric_id: "losIndex".to_string(),
            child_value: 1.10,
            parent_value: 1.00,
            weight_share: 0.35,
            excess_over_parent: 0.05,
            contribution_weight: 0.1,
            contribution_rank: rank,
        }
    }
}

pub async fn insert_edge(pool: &SqlitePool, e: &Edge) {
    sqlx::query(
        r#"
        INSERT INTO fct_contributions (run_id, parent_node_id, parent_facility_id, parent_service_line,
                                       child_facility_id, child_service_line, child_sub_service_line,
                                       metric_id, contribution_method, child_value, parent_value,
                                       weight_field, weight_value, weight_share, excess_over_parent,
                                       contribution_weight, contribution_rank)
        VALUES ('run-1', ?, ?, ?, ?, ?, ?, ?, 'weighted_mean', ?, ?, 'encounters', 120, ?, ?, ?, ?)
        "#,
    )
    .bind(&e.parent_node_id)
    .bind(&e.parent_facility_id)
    .bind(&e.parent_service_line)
    .bind(&e.child_facility_id)
    .bind(&e.child_service_line)
    .bind(&e.child_sub_service_line)
    .bind(&e.metric_id)
    .bind(e.child_value)
    .bind(e.parent_value)
    .bind(e.weight_share)
    .bind(e.excess_over_parent)
    .bind(e.contribution_weight)
    .bind(e.contribution_rank)
    .execute(pool)
    .await
    .expect("insert fct_contributions row");
}

/// In-memory signal for driving the reconstructor without a database
pub fn sample_signal(service_line: Option<&str>, sub_service_line: Option<&str>) -> Signal {
    Signal {
        guid: Uuid::new_v4(),
        canonical_node_id: "losIndex__medicareId__vizientServiceLine".to_string(),
        metric_id: "losIndex".to_string(),
        domain: SignalDomain::Efficiency,
        facility: "AFP658".to_string(),
        facility_id: Some("AFP658".to_string()),
        system_name: None,
        service_line: service_line.map(String::from),
        sub_service_line: sub_service_line.map(String::from),
        description: "losIndex anomaly detected".to_string(),
        metric_value: Decimal::new(125, 2),
        peer_mean: None,
        peer_std: None,
        percentile_rank: None,
        encounters: None,
        detected_at: Utc.with_ymd_and_hms(2025, 12, 10, 17, 2, 10).unwrap(),
        temporal_node_id: None,
        entity_dimensions: None,
        entity_dimensions_hash: EMPTY_DIMENSIONS_HASH.to_string(),
        groupby_label: None,
        group_value: None,
        metric_trend_timeline: None,
        trend_direction: None,
        simplified_signal_type: None,
        simplified_severity: None,
        simplified_severity_range: None,
        simplified_inputs: None,
        simplified_indicators: None,
        simplified_reasoning: None,
        simplified_severity_calculation: None,
        metadata: None,
        metadata_per_period: None,
        peer_percentile_trends: None,
        workflow_status: WorkflowStatus::New,
        workflow_notes: None,
        assigned_to: None,
        import_revision: 1,
        created_at: "2025-12-10T17:02:10.000Z".to_string(),
        updated_at: "2025-12-10T17:02:10.000Z".to_string(),
    }
}
