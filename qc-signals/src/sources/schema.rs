//! Shape of the analytics marts
//!
//! The pipeline owns `fct_signals` and `fct_contributions`; this service only
//! reads them. The DDL here mirrors the pipeline's output so tests and local
//! development databases can be seeded with the same layout.

use qc_common::Result;
use sqlx::SqlitePool;

/// Create `fct_signals` and `fct_contributions` if missing
pub async fn create_mart_tables(pool: &SqlitePool) -> Result<()> {
    create_fct_signals(pool).await?;
    create_fct_contributions(pool).await?;
    Ok(())
}

async fn create_fct_signals(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fct_signals (
            signal_id TEXT,
            run_id TEXT,
            canonical_node_id TEXT,
            temporal_node_id TEXT,
            system_name TEXT,
            facility_id TEXT,
            service_line TEXT,
            sub_service_line TEXT,
            metric_id TEXT,
            metric_value NUMERIC,
            benchmark_value NUMERIC,
            peer_std NUMERIC,
            peer_count INTEGER,
            percentile_rank NUMERIC,
            encounters INTEGER,
            domain TEXT,
            description TEXT,
            entity_dimensions TEXT,
            entity_dimensions_hash TEXT,
            groupby_label TEXT,
            group_value TEXT,
            metric_trend_timeline TEXT,
            trend_direction TEXT,
            statistical_methods TEXT,
            simple_zscore NUMERIC,
            robust_zscore NUMERIC,
            latest_simple_zscore NUMERIC,
            mean_simple_zscore NUMERIC,
            latest_robust_zscore NUMERIC,
            mean_robust_zscore NUMERIC,
            global_metric_mean NUMERIC,
            global_metric_std NUMERIC,
            slope NUMERIC,
            slope_percentile NUMERIC,
            acceleration NUMERIC,
            momentum TEXT,
            monthly_z_scores TEXT,
            simple_zscore_anomaly TEXT,
            robust_zscore_anomaly TEXT,
            latest_simple_zscore_anomaly TEXT,
            mean_simple_zscore_anomaly TEXT,
            latest_robust_zscore_anomaly TEXT,
            mean_robust_zscore_anomaly TEXT,
            slope_anomaly TEXT,
            magnitude_tier TEXT,
            trajectory_tier TEXT,
            consistency_tier TEXT,
            coefficient_of_variation NUMERIC,
            simplified_signal_type TEXT,
            simplified_severity INTEGER,
            simplified_severity_range TEXT,
            simplified_inputs TEXT,
            simplified_indicators TEXT,
            simplified_reasoning TEXT,
            simplified_severity_calculation TEXT,
            metadata TEXT,
            metadata_per_period TEXT,
            peer_percentile_trends TEXT,
            detected_at TEXT,
            dbt_updated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_fct_contributions(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fct_contributions (
            contribution_id TEXT,
            run_id TEXT,
            parent_node_id TEXT,
            child_node_id TEXT,
            parent_facility_id TEXT,
            parent_service_line TEXT,
            child_facility_id TEXT,
            child_service_line TEXT,
            child_sub_service_line TEXT,
            child_admission_status TEXT,
            child_discharge_status TEXT,
            child_payer_segment TEXT,
            child_admission_source TEXT,
            metric_id TEXT,
            contribution_method TEXT,
            child_value REAL,
            parent_value REAL,
            weight_field TEXT,
            weight_value REAL,
            weight_share REAL,
            excess_over_parent REAL,
            contribution_weight REAL,
            contribution_direction TEXT,
            contribution_rank INTEGER,
            contribution_pct REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fct_contributions_parent ON fct_contributions(parent_node_id, parent_facility_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
