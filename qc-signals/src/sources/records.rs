//! Rows as read from the analytics marts
//!
//! Mart rows are decoded loosely (text or NULL) so that a single odd value
//! becomes a skipped record further up instead of failing the whole fetch.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use qc_common::identity::{effective_dimensions_hash, EntityDimensions};

/// Child dimension columns of `fct_contributions` and the entity key each one maps to
///
/// Order matters: it is the key order of the reconstructed child entity.
pub const CHILD_DIMENSION_COLUMNS: [(&str, &str); 7] = [
    ("child_facility_id", "medicareId"),
    ("child_service_line", "vizientServiceLine"),
    ("child_sub_service_line", "vizientSubServiceLine"),
    ("child_admission_status", "admissionStatus"),
    ("child_discharge_status", "dischargeStatus"),
    ("child_payer_segment", "payerSegment"),
    ("child_admission_source", "admissionSource"),
];

/// Parent dimension columns of `fct_contributions`
pub const PARENT_DIMENSION_COLUMNS: [(&str, &str); 2] = [
    ("parent_facility_id", "medicareId"),
    ("parent_service_line", "vizientServiceLine"),
];

/// One `fct_signals` row, every value still in its text form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MartSignalRow {
    pub run_id: Option<String>,
    pub canonical_node_id: Option<String>,
    pub temporal_node_id: Option<String>,
    pub system_name: Option<String>,
    pub facility_id: Option<String>,
    pub service_line: Option<String>,
    pub sub_service_line: Option<String>,
    pub metric_id: Option<String>,
    pub metric_value: Option<String>,
    pub peer_mean: Option<String>,
    pub peer_std: Option<String>,
    pub percentile_rank: Option<String>,
    pub encounters: Option<String>,
    pub domain: Option<String>,
    pub description: Option<String>,
    pub entity_dimensions: Option<String>,
    pub entity_dimensions_hash: Option<String>,
    pub groupby_label: Option<String>,
    pub group_value: Option<String>,
    pub metric_trend_timeline: Option<String>,
    pub trend_direction: Option<String>,
    pub simplified_signal_type: Option<String>,
    pub simplified_severity: Option<String>,
    pub simplified_severity_range: Option<String>,
    pub simplified_inputs: Option<String>,
    pub simplified_indicators: Option<String>,
    pub simplified_reasoning: Option<String>,
    pub simplified_severity_calculation: Option<String>,
    pub metadata: Option<String>,
    pub metadata_per_period: Option<String>,
    pub peer_percentile_trends: Option<String>,
    pub detected_at: Option<String>,
    pub dbt_updated_at: Option<String>,
}

/// Source expression and alias of every column [`MartSignalRow::from_row`] reads
const MART_SIGNAL_COLUMNS: [(&str, &str); 33] = [
    ("run_id", "run_id"),
    ("canonical_node_id", "canonical_node_id"),
    ("temporal_node_id", "temporal_node_id"),
    ("system_name", "system_name"),
    ("facility_id", "facility_id"),
    ("service_line", "service_line"),
    ("sub_service_line", "sub_service_line"),
    ("metric_id", "metric_id"),
    ("metric_value", "metric_value"),
    ("benchmark_value", "peer_mean"),
    ("peer_std", "peer_std"),
    ("percentile_rank", "percentile_rank"),
    ("encounters", "encounters"),
    ("domain", "domain"),
    ("description", "description"),
    ("entity_dimensions", "entity_dimensions"),
    ("entity_dimensions_hash", "entity_dimensions_hash"),
    ("groupby_label", "groupby_label"),
    ("group_value", "group_value"),
    ("metric_trend_timeline", "metric_trend_timeline"),
    ("trend_direction", "trend_direction"),
    ("simplified_signal_type", "simplified_signal_type"),
    ("simplified_severity", "simplified_severity"),
    ("simplified_severity_range", "simplified_severity_range"),
    ("simplified_inputs", "simplified_inputs"),
    ("simplified_indicators", "simplified_indicators"),
    ("simplified_reasoning", "simplified_reasoning"),
    ("simplified_severity_calculation", "simplified_severity_calculation"),
    ("metadata", "metadata"),
    ("metadata_per_period", "metadata_per_period"),
    ("peer_percentile_trends", "peer_percentile_trends"),
    ("detected_at", "detected_at"),
    ("dbt_updated_at", "dbt_updated_at"),
];

/// Select list for [`MartSignalRow::from_row`]
///
/// Everything is cast to text so decoding cannot fail on a column's storage
/// class; value validation happens when the row is mapped to a signal.
pub(crate) fn mart_signal_select() -> String {
    MART_SIGNAL_COLUMNS
        .iter()
        .map(|(source, alias)| format!("CAST({source} AS TEXT) AS {alias}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl MartSignalRow {
    pub fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            canonical_node_id: row.try_get("canonical_node_id")?,
            temporal_node_id: row.try_get("temporal_node_id")?,
            system_name: row.try_get("system_name")?,
            facility_id: row.try_get("facility_id")?,
            service_line: row.try_get("service_line")?,
            sub_service_line: row.try_get("sub_service_line")?,
            metric_id: row.try_get("metric_id")?,
            metric_value: row.try_get("metric_value")?,
            peer_mean: row.try_get("peer_mean")?,
            peer_std: row.try_get("peer_std")?,
            percentile_rank: row.try_get("percentile_rank")?,
            encounters: row.try_get("encounters")?,
            domain: row.try_get("domain")?,
            description: row.try_get("description")?,
            entity_dimensions: row.try_get("entity_dimensions")?,
            entity_dimensions_hash: row.try_get("entity_dimensions_hash")?,
            groupby_label: row.try_get("groupby_label")?,
            group_value: row.try_get("group_value")?,
            metric_trend_timeline: row.try_get("metric_trend_timeline")?,
            trend_direction: row.try_get("trend_direction")?,
            simplified_signal_type: row.try_get("simplified_signal_type")?,
            simplified_severity: row.try_get("simplified_severity")?,
            simplified_severity_range: row.try_get("simplified_severity_range")?,
            simplified_inputs: row.try_get("simplified_inputs")?,
            simplified_indicators: row.try_get("simplified_indicators")?,
            simplified_reasoning: row.try_get("simplified_reasoning")?,
            simplified_severity_calculation: row.try_get("simplified_severity_calculation")?,
            metadata: row.try_get("metadata")?,
            metadata_per_period: row.try_get("metadata_per_period")?,
            peer_percentile_trends: row.try_get("peer_percentile_trends")?,
            detected_at: row.try_get("detected_at")?,
            dbt_updated_at: row.try_get("dbt_updated_at")?,
        })
    }
}

/// One `fct_contributions` row
///
/// Entity dimensions stay as `(entity key, column value)` pairs in the order of
/// [`CHILD_DIMENSION_COLUMNS`] / [`PARENT_DIMENSION_COLUMNS`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContributionRow {
    pub contribution_id: Option<String>,
    pub run_id: Option<String>,
    pub parent_node_id: Option<String>,
    pub child_node_id: Option<String>,
    pub metric_id: Option<String>,
    pub parent_dimensions: Vec<(&'static str, Option<String>)>,
    pub child_dimensions: Vec<(&'static str, Option<String>)>,
    pub contribution_method: Option<String>,
    pub child_value: Option<f64>,
    pub parent_value: Option<f64>,
    pub weight_field: Option<String>,
    pub weight_value: Option<f64>,
    pub weight_share: Option<f64>,
    pub excess_over_parent: Option<f64>,
    pub contribution_weight: Option<f64>,
    pub contribution_direction: Option<String>,
    pub contribution_rank: Option<i64>,
    pub contribution_pct: Option<f64>,
}

/// Select list for [`ContributionRow::from_row`], built from the dimension column tables
pub(crate) fn contribution_select() -> String {
    let mut columns: Vec<String> = [
        "contribution_id",
        "run_id",
        "parent_node_id",
        "child_node_id",
        "metric_id",
        "contribution_method",
        "weight_field",
        "contribution_direction",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();

    for (column, _) in PARENT_DIMENSION_COLUMNS.iter().chain(CHILD_DIMENSION_COLUMNS.iter()) {
        columns.push(column.to_string());
    }

    for column in [
        "child_value",
        "parent_value",
        "weight_value",
        "weight_share",
        "excess_over_parent",
        "contribution_weight",
        "contribution_pct",
    ] {
        columns.push(format!("CAST({column} AS REAL) AS {column}"));
    }
    columns.push("CAST(contribution_rank AS INTEGER) AS contribution_rank".to_string());

    columns.join(", ")
}

impl ContributionRow {
    pub fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let dimensions = |table: &[(&'static str, &'static str)]| -> Result<Vec<(&'static str, Option<String>)>, sqlx::Error> {
            table
                .iter()
                .map(|(column, key)| Ok((*key, row.try_get::<Option<String>, _>(*column)?)))
                .collect()
        };

        Ok(Self {
            contribution_id: row.try_get("contribution_id")?,
            run_id: row.try_get("run_id")?,
            parent_node_id: row.try_get("parent_node_id")?,
            child_node_id: row.try_get("child_node_id")?,
            metric_id: row.try_get("metric_id")?,
            parent_dimensions: dimensions(&PARENT_DIMENSION_COLUMNS[..])?,
            child_dimensions: dimensions(&CHILD_DIMENSION_COLUMNS[..])?,
            contribution_method: row.try_get("contribution_method")?,
            child_value: row.try_get("child_value")?,
            parent_value: row.try_get("parent_value")?,
            weight_field: row.try_get("weight_field")?,
            weight_value: row.try_get("weight_value")?,
            weight_share: row.try_get("weight_share")?,
            excess_over_parent: row.try_get("excess_over_parent")?,
            contribution_weight: row.try_get("contribution_weight")?,
            contribution_direction: row.try_get("contribution_direction")?,
            contribution_rank: row.try_get("contribution_rank")?,
            contribution_pct: row.try_get("contribution_pct")?,
        })
    }
}

/// Statistical payload columns of `fct_signals` for the drill-down view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechnicalDetailsRow {
    pub canonical_node_id: Option<String>,
    pub entity_dimensions: Option<String>,
    pub entity_dimensions_hash: Option<String>,
    pub statistical_methods: Option<String>,
    pub simple_zscore: Option<String>,
    pub robust_zscore: Option<String>,
    pub latest_simple_zscore: Option<String>,
    pub mean_simple_zscore: Option<String>,
    pub latest_robust_zscore: Option<String>,
    pub mean_robust_zscore: Option<String>,
    pub percentile_rank: Option<String>,
    pub peer_std: Option<String>,
    pub peer_count: Option<i64>,
    pub encounters: Option<i64>,
    pub global_metric_mean: Option<String>,
    pub global_metric_std: Option<String>,
    pub slope: Option<String>,
    pub slope_percentile: Option<String>,
    pub acceleration: Option<String>,
    pub trend_direction: Option<String>,
    pub momentum: Option<String>,
    pub monthly_z_scores: Option<String>,
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
    pub coefficient_of_variation: Option<String>,
    pub simplified_signal_type: Option<String>,
    pub simplified_severity: Option<i64>,
    pub simplified_severity_range: Option<String>,
    pub simplified_inputs: Option<String>,
    pub simplified_indicators: Option<String>,
    pub simplified_reasoning: Option<String>,
    pub simplified_severity_calculation: Option<String>,
}

pub(crate) const TECHNICAL_DETAILS_SELECT: &str = r#"
    canonical_node_id,
    CAST(entity_dimensions AS TEXT) AS entity_dimensions,
    entity_dimensions_hash,
    CAST(statistical_methods AS TEXT) AS statistical_methods,
    CAST(simple_zscore AS TEXT) AS simple_zscore,
    CAST(robust_zscore AS TEXT) AS robust_zscore,
    CAST(latest_simple_zscore AS TEXT) AS latest_simple_zscore,
    CAST(mean_simple_zscore AS TEXT) AS mean_simple_zscore,
    CAST(latest_robust_zscore AS TEXT) AS latest_robust_zscore,
    CAST(mean_robust_zscore AS TEXT) AS mean_robust_zscore,
    CAST(percentile_rank AS TEXT) AS percentile_rank,
    CAST(peer_std AS TEXT) AS peer_std,
    CAST(peer_count AS INTEGER) AS peer_count,
    CAST(encounters AS INTEGER) AS encounters,
    CAST(global_metric_mean AS TEXT) AS global_metric_mean,
    CAST(global_metric_std AS TEXT) AS global_metric_std,
    CAST(slope AS TEXT) AS slope,
    CAST(slope_percentile AS TEXT) AS slope_percentile,
    CAST(acceleration AS TEXT) AS acceleration,
    trend_direction,
    momentum,
    CAST(monthly_z_scores AS TEXT) AS monthly_z_scores,
    simple_zscore_anomaly,
    robust_zscore_anomaly,
    latest_simple_zscore_anomaly,
    mean_simple_zscore_anomaly,
    latest_robust_zscore_anomaly,
    mean_robust_zscore_anomaly,
    slope_anomaly,
    magnitude_tier,
    trajectory_tier,
    consistency_tier,
    CAST(coefficient_of_variation AS TEXT) AS coefficient_of_variation,
    simplified_signal_type,
    CAST(simplified_severity AS INTEGER) AS simplified_severity,
    CAST(simplified_severity_range AS TEXT) AS simplified_severity_range,
    CAST(simplified_inputs AS TEXT) AS simplified_inputs,
    CAST(simplified_indicators AS TEXT) AS simplified_indicators,
    simplified_reasoning,
    CAST(simplified_severity_calculation AS TEXT) AS simplified_severity_calculation
"#;

impl TechnicalDetailsRow {
    /// Dimension hash the importer stores for this row
    ///
    /// The recorded hash when present, else the one computed from the
    /// dimensions. `None` when the dimensions cannot be parsed.
    pub fn effective_hash(&self) -> Option<String> {
        let dimensions = match self.entity_dimensions.as_deref().map(str::trim) {
            None | Some("") | Some("null") => None,
            Some(raw) => Some(EntityDimensions::parse(raw).ok()?),
        };
        Some(effective_dimensions_hash(
            self.entity_dimensions_hash.as_deref(),
            dimensions.as_ref(),
        ))
    }

    pub fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            canonical_node_id: row.try_get("canonical_node_id")?,
            entity_dimensions: row.try_get("entity_dimensions")?,
            entity_dimensions_hash: row.try_get("entity_dimensions_hash")?,
            statistical_methods: row.try_get("statistical_methods")?,
            simple_zscore: row.try_get("simple_zscore")?,
            robust_zscore: row.try_get("robust_zscore")?,
            latest_simple_zscore: row.try_get("latest_simple_zscore")?,
            mean_simple_zscore: row.try_get("mean_simple_zscore")?,
            latest_robust_zscore: row.try_get("latest_robust_zscore")?,
            mean_robust_zscore: row.try_get("mean_robust_zscore")?,
            percentile_rank: row.try_get("percentile_rank")?,
            peer_std: row.try_get("peer_std")?,
            peer_count: row.try_get("peer_count")?,
            encounters: row.try_get("encounters")?,
            global_metric_mean: row.try_get("global_metric_mean")?,
            global_metric_std: row.try_get("global_metric_std")?,
            slope: row.try_get("slope")?,
            slope_percentile: row.try_get("slope_percentile")?,
            acceleration: row.try_get("acceleration")?,
            trend_direction: row.try_get("trend_direction")?,
            momentum: row.try_get("momentum")?,
            monthly_z_scores: row.try_get("monthly_z_scores")?,
            simple_zscore_anomaly: row.try_get("simple_zscore_anomaly")?,
            robust_zscore_anomaly: row.try_get("robust_zscore_anomaly")?,
            latest_simple_zscore_anomaly: row.try_get("latest_simple_zscore_anomaly")?,
            mean_simple_zscore_anomaly: row.try_get("mean_simple_zscore_anomaly")?,
            latest_robust_zscore_anomaly: row.try_get("latest_robust_zscore_anomaly")?,
            mean_robust_zscore_anomaly: row.try_get("mean_robust_zscore_anomaly")?,
            slope_anomaly: row.try_get("slope_anomaly")?,
            magnitude_tier: row.try_get("magnitude_tier")?,
            trajectory_tier: row.try_get("trajectory_tier")?,
            consistency_tier: row.try_get("consistency_tier")?,
            coefficient_of_variation: row.try_get("coefficient_of_variation")?,
            simplified_signal_type: row.try_get("simplified_signal_type")?,
            simplified_severity: row.try_get("simplified_severity")?,
            simplified_severity_range: row.try_get("simplified_severity_range")?,
            simplified_inputs: row.try_get("simplified_inputs")?,
            simplified_indicators: row.try_get("simplified_indicators")?,
            simplified_reasoning: row.try_get("simplified_reasoning")?,
            simplified_severity_calculation: row.try_get("simplified_severity_calculation")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contribution_select_covers_every_dimension_column() {
        let select = contribution_select();
        for (column, _) in CHILD_DIMENSION_COLUMNS.iter().chain(PARENT_DIMENSION_COLUMNS.iter()) {
            assert!(select.contains(column), "missing {column}");
        }
        assert!(select.contains("CAST(contribution_rank AS INTEGER) AS contribution_rank"));
    }

    #[test]
    fn test_effective_hash_falls_back_to_dimensions() {
        let recorded = TechnicalDetailsRow {
            entity_dimensions: Some(r#"{"payerSegment": "Medicare"}"#.into()),
            entity_dimensions_hash: Some("from-pipeline".into()),
            ..Default::default()
        };
        assert_eq!(recorded.effective_hash().as_deref(), Some("from-pipeline"));

        let computed = TechnicalDetailsRow {
            entity_dimensions_hash: None,
            ..recorded.clone()
        };
        assert_eq!(
            computed.effective_hash().as_deref(),
            Some("a168309380c8d0c3a7aae3fafc947f55")
        );

        let unreadable = TechnicalDetailsRow {
            entity_dimensions: Some("{broken".into()),
            ..Default::default()
        };
        assert_eq!(unreadable.effective_hash(), None);
        assert_eq!(
            TechnicalDetailsRow::default().effective_hash().as_deref(),
            Some("d41d8cd98f00b204e9800998ecf8427e")
        );
    }

    #[test]
    fn test_child_dimension_keys_are_unique() {
        let mut keys: Vec<&str> = CHILD_DIMENSION_COLUMNS.iter().map(|(_, k)| *k).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), CHILD_DIMENSION_COLUMNS.len());
    }
}
