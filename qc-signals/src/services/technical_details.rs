//! Technical-detail lookup
//!
//! The statistical payload behind a signal is not copied into the signals
//! table; it is read from `fct_signals` on demand.

use std::sync::Arc;

use qc_common::decimal::parse_optional_decimal;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::sources::{SignalSource, TechnicalDetailsRow};

/// Statistical payload of one signal
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TechnicalDetails {
    pub entity_dimensions_hash: Option<String>,
    pub statistical_methods: Option<Value>,

    #[serde(with = "rust_decimal::serde::float_option")]
    pub simple_zscore: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub robust_zscore: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub latest_simple_zscore: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub mean_simple_zscore: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub latest_robust_zscore: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub mean_robust_zscore: Option<Decimal>,

    #[serde(with = "rust_decimal::serde::float_option")]
    pub percentile_rank: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub peer_std: Option<Decimal>,
    pub peer_count: Option<i64>,
    pub encounters: Option<i64>,

    #[serde(with = "rust_decimal::serde::float_option")]
    pub global_metric_mean: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub global_metric_std: Option<Decimal>,

    #[serde(with = "rust_decimal::serde::float_option")]
    pub slope: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub slope_percentile: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub acceleration: Option<Decimal>,
    pub trend_direction: Option<String>,
    pub momentum: Option<String>,
    pub monthly_z_scores: Option<Value>,

    pub simple_zscore_anomaly: Option<String>,
    pub robust_zscore_anomaly: Option<String>,
    pub latest_simple_zscore_anomaly: Option<String>,
    pub mean_simple_zscore_anomaly: Option<String>,
    pub latest_robust_zscore_anomaly: Option<String>,
    pub mean_robust_zscore_anomaly: Option<String>,
    pub slope_anomaly: Option<String>,

    pub magnitude_tier: Option<String>,
    pub trajectory_tier: Option<String>,
    pub consistency_tier: Option<String>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub coefficient_of_variation: Option<Decimal>,

    pub simplified_signal_type: Option<String>,
    pub simplified_severity: Option<i64>,
    pub simplified_severity_range: Option<Value>,
    pub simplified_inputs: Option<Value>,
    pub simplified_indicators: Option<Value>,
    pub simplified_reasoning: Option<String>,
    pub simplified_severity_calculation: Option<Value>,

    /// Not produced by the pipeline yet
    #[serde(with = "rust_decimal::serde::float_option")]
    pub data_quality_fallback_rate: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub data_quality_missing_rate: Option<Decimal>,
    /// Suppressed signals never reach `fct_signals`
    pub data_quality_suppressed: bool,
}

/// Unparseable numbers become absent; this is a display path
fn lenient_decimal(field: &str, raw: Option<String>) -> Option<Decimal> {
    parse_optional_decimal(raw.as_deref()).unwrap_or_else(|e| {
        warn!(field, error = %e, "Ignoring unparseable technical detail");
        None
    })
}

/// JSON columns that fail to parse are passed through as a string
fn lenient_json(raw: Option<String>) -> Option<Value> {
    let raw = raw.filter(|r| !r.trim().is_empty())?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(raw)),
    }
}

impl From<TechnicalDetailsRow> for TechnicalDetails {
    fn from(row: TechnicalDetailsRow) -> Self {
        Self {
            entity_dimensions_hash: row.effective_hash(),
            statistical_methods: lenient_json(row.statistical_methods),
            simple_zscore: lenient_decimal("simple_zscore", row.simple_zscore),
            robust_zscore: lenient_decimal("robust_zscore", row.robust_zscore),
            latest_simple_zscore: lenient_decimal("latest_simple_zscore", row.latest_simple_zscore),
            mean_simple_zscore: lenient_decimal("mean_simple_zscore", row.mean_simple_zscore),
            latest_robust_zscore: lenient_decimal("latest_robust_zscore", row.latest_robust_zscore),
            mean_robust_zscore: lenient_decimal("mean_robust_zscore", row.mean_robust_zscore),
            percentile_rank: lenient_decimal("percentile_rank", row.percentile_rank),
            peer_std: lenient_decimal("peer_std", row.peer_std),
            peer_count: row.peer_count,
            encounters: row.encounters,
            global_metric_mean: lenient_decimal("global_metric_mean", row.global_metric_mean),
            global_metric_std: lenient_decimal("global_metric_std", row.global_metric_std),
            slope: lenient_decimal("slope", row.slope),
            slope_percentile: lenient_decimal("slope_percentile", row.slope_percentile),
            acceleration: lenient_decimal("acceleration", row.acceleration),
            trend_direction: row.trend_direction,
            momentum: row.momentum,
            monthly_z_scores: lenient_json(row.monthly_z_scores),
            simple_zscore_anomaly: row.simple_zscore_anomaly,
            robust_zscore_anomaly: row.robust_zscore_anomaly,
            latest_simple_zscore_anomaly: row.latest_simple_zscore_anomaly,
            mean_simple_zscore_anomaly: row.mean_simple_zscore_anomaly,
            latest_robust_zscore_anomaly: row.latest_robust_zscore_anomaly,
            mean_robust_zscore_anomaly: row.mean_robust_zscore_anomaly,
            slope_anomaly: row.slope_anomaly,
            magnitude_tier: row.magnitude_tier,
            trajectory_tier: row.trajectory_tier,
            consistency_tier: row.consistency_tier,
            coefficient_of_variation: lenient_decimal("coefficient_of_variation", row.coefficient_of_variation),
            simplified_signal_type: row.simplified_signal_type,
            simplified_severity: row.simplified_severity,
            simplified_severity_range: lenient_json(row.simplified_severity_range),
            simplified_inputs: lenient_json(row.simplified_inputs),
            simplified_indicators: lenient_json(row.simplified_indicators),
            simplified_reasoning: row.simplified_reasoning,
            simplified_severity_calculation: lenient_json(row.simplified_severity_calculation),
            data_quality_fallback_rate: None,
            data_quality_missing_rate: None,
            data_quality_suppressed: false,
        }
    }
}

pub struct TechnicalDetailsService {
    source: Arc<dyn SignalSource>,
}

impl TechnicalDetailsService {
    pub fn new(source: Arc<dyn SignalSource>) -> Self {
        Self { source }
    }

    /// Details of the exact entity, or of the node's first row when no hash is given
    ///
    /// `Ok(None)` when nothing matches; source failures propagate.
    pub async fn details(
        &self,
        canonical_node_id: &str,
        entity_dimensions_hash: Option<&str>,
    ) -> qc_common::Result<Option<TechnicalDetails>> {
        if entity_dimensions_hash.is_none() {
            debug!(canonical_node_id, "Technical details lookup without entity hash");
        }
        let row = self
            .source
            .technical_details(canonical_node_id, entity_dimensions_hash)
            .await?;
        Ok(row.map(TechnicalDetails::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_parsing() {
        let details = TechnicalDetails::from(TechnicalDetailsRow {
            simple_zscore: Some("2.31".into()),
            robust_zscore: Some("not-a-number".into()),
            monthly_z_scores: Some("[1.2, 0.8]".into()),
            simplified_inputs: Some("{broken".into()),
            peer_count: Some(42),
            ..Default::default()
        });

        assert_eq!(details.simple_zscore, Some(Decimal::new(231, 2)));
        assert_eq!(details.robust_zscore, None);
        assert_eq!(details.monthly_z_scores, Some(serde_json::json!([1.2, 0.8])));
        assert_eq!(details.simplified_inputs, Some(Value::String("{broken".into())));
        assert_eq!(details.peer_count, Some(42));
        assert!(!details.data_quality_suppressed);
    }

    #[tokio::test]
    async fn test_lookup_without_hash_is_deterministic() {
        use crate::sources::schema::create_mart_tables;
        use crate::sources::SqliteMart;
        use sqlx::sqlite::SqlitePoolOptions;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_mart_tables(&pool).await.unwrap();
        for (hash, detected_at, zscore) in [
            ("bbb", "2025-12-01T00:00:00Z", "3.0"),
            ("aaa", "2025-12-10T00:00:00Z", "2.0"),
            ("aaa", "2025-12-05T00:00:00Z", "1.0"),
        ] {
            sqlx::query(
                "INSERT INTO fct_signals (canonical_node_id, metric_id, entity_dimensions_hash, detected_at, simple_zscore)
                 VALUES ('losIndex__medicareId__payerSegment', 'losIndex', ?, ?, ?)",
            )
            .bind(hash)
            .bind(detected_at)
            .bind(zscore)
            .execute(&pool)
            .await
            .unwrap();
        }
        let service = TechnicalDetailsService::new(Arc::new(SqliteMart::new(pool)));

        for _ in 0..3 {
            let details = service
                .details("losIndex__medicareId__payerSegment", None)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(details.entity_dimensions_hash.as_deref(), Some("aaa"));
            assert_eq!(details.simple_zscore, Some(Decimal::new(1, 0)));
        }
        assert!(service.details("unknown", None).await.unwrap().is_none());
    }

    #[test]
    fn test_serializes_placeholders() {
        let json = serde_json::to_value(TechnicalDetails::from(TechnicalDetailsRow::default())).unwrap();
        assert_eq!(json["data_quality_suppressed"], false);
        assert_eq!(json["data_quality_fallback_rate"], Value::Null);
    }
}
