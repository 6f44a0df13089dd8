//! Database models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::decimal::{parse_decimal, parse_optional_decimal};
use crate::hierarchy::HierarchyLevel;
use crate::identity::EntityDimensions;
use crate::time::parse_timestamp;
use crate::{Error, Result};

/// Display name used when a signal carries no facility id
pub const UNKNOWN_FACILITY: &str = "Unknown Facility";

/// Quality domain of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalDomain {
    Efficiency,
    Safety,
    Effectiveness,
}

impl SignalDomain {
    /// Map the pipeline's domain label; unknown or missing labels fall back to Efficiency
    pub fn from_mart(label: Option<&str>) -> Self {
        match label {
            Some("Safety") => SignalDomain::Safety,
            Some("Effectiveness") => SignalDomain::Effectiveness,
            Some("Efficiency") => SignalDomain::Efficiency,
            _ => SignalDomain::Efficiency,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDomain::Efficiency => "Efficiency",
            SignalDomain::Safety => "Safety",
            SignalDomain::Effectiveness => "Effectiveness",
        }
    }
}

impl FromStr for SignalDomain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Efficiency" => Ok(SignalDomain::Efficiency),
            "Safety" => Ok(SignalDomain::Safety),
            "Effectiveness" => Ok(SignalDomain::Effectiveness),
            other => Err(Error::InvalidInput(format!("unknown domain: {}", other))),
        }
    }
}

impl fmt::Display for SignalDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow state owned by the assignment subsystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    New,
    Assigned,
    InProgress,
    Resolved,
    Closed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::New => "new",
            WorkflowStatus::Assigned => "assigned",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Resolved => "resolved",
            WorkflowStatus::Closed => "closed",
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(WorkflowStatus::New),
            "assigned" => Ok(WorkflowStatus::Assigned),
            "in_progress" => Ok(WorkflowStatus::InProgress),
            "resolved" => Ok(WorkflowStatus::Resolved),
            "closed" => Ok(WorkflowStatus::Closed),
            other => Err(Error::InvalidInput(format!("unknown workflow status: {}", other))),
        }
    }
}

/// Column list matching [`Signal::from_row`]
pub const SIGNAL_COLUMNS: &str = r#"
    guid, canonical_node_id, metric_id, domain, facility_id, system_name,
    service_line, sub_service_line, description, metric_value, peer_mean, peer_std,
    percentile_rank, encounters, detected_at, temporal_node_id,
    entity_dimensions, entity_dimensions_hash, groupby_label, group_value,
    metric_trend_timeline, trend_direction,
    simplified_signal_type, simplified_severity, simplified_severity_range,
    simplified_inputs, simplified_indicators, simplified_reasoning,
    simplified_severity_calculation,
    metadata, metadata_per_period, peer_percentile_trends,
    workflow_status, workflow_notes, assigned_to,
    import_revision, created_at, updated_at
"#;

/// Canonical signal row
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub guid: Uuid,
    pub canonical_node_id: String,
    pub metric_id: String,
    pub domain: SignalDomain,
    pub facility: String,
    pub facility_id: Option<String>,
    pub system_name: Option<String>,
    pub service_line: Option<String>,
    pub sub_service_line: Option<String>,
    pub description: String,
    pub metric_value: Decimal,
    pub peer_mean: Option<Decimal>,
    pub peer_std: Option<Decimal>,
    pub percentile_rank: Option<Decimal>,
    pub encounters: Option<i64>,
    pub detected_at: DateTime<Utc>,
    pub temporal_node_id: Option<String>,
    pub entity_dimensions: Option<EntityDimensions>,
    pub entity_dimensions_hash: String,
    pub groupby_label: Option<String>,
    pub group_value: Option<String>,
    pub metric_trend_timeline: Option<serde_json::Value>,
    pub trend_direction: Option<String>,
    pub simplified_signal_type: Option<String>,
    pub simplified_severity: Option<i64>,
    pub simplified_severity_range: Option<serde_json::Value>,
    pub simplified_inputs: Option<serde_json::Value>,
    pub simplified_indicators: Option<serde_json::Value>,
    pub simplified_reasoning: Option<String>,
    pub simplified_severity_calculation: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub metadata_per_period: Option<serde_json::Value>,
    pub peer_percentile_trends: Option<serde_json::Value>,
    pub workflow_status: WorkflowStatus,
    pub workflow_notes: Option<String>,
    pub assigned_to: Option<String>,
    pub import_revision: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Signal {
    /// Decode a row selected with [`SIGNAL_COLUMNS`]
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let guid: String = row.try_get("guid")?;
        let domain: String = row.try_get("domain")?;
        let facility_id: String = row.try_get("facility_id")?;
        let metric_value: String = row.try_get("metric_value")?;
        let detected_at: String = row.try_get("detected_at")?;
        let workflow_status: String = row.try_get("workflow_status")?;
        let entity_dimensions: Option<Json<EntityDimensions>> = row.try_get("entity_dimensions")?;

        // Absent facility is stored as '' so the unique index can see it
        let facility_id = Some(facility_id).filter(|f| !f.is_empty());

        Ok(Self {
            guid: Uuid::parse_str(&guid)
                .map_err(|e| Error::Internal(format!("Invalid UUID in database: {}", e)))?,
            canonical_node_id: row.try_get("canonical_node_id")?,
            metric_id: row.try_get("metric_id")?,
            domain: domain.parse()?,
            facility: facility_id.clone().unwrap_or_else(|| UNKNOWN_FACILITY.to_string()),
            facility_id,
            system_name: row.try_get("system_name")?,
            service_line: row.try_get("service_line")?,
            sub_service_line: row.try_get("sub_service_line")?,
            description: row.try_get("description")?,
            metric_value: parse_decimal(&metric_value)?,
            peer_mean: parse_optional_decimal(row.try_get::<Option<String>, _>("peer_mean")?.as_deref())?,
            peer_std: parse_optional_decimal(row.try_get::<Option<String>, _>("peer_std")?.as_deref())?,
            percentile_rank: parse_optional_decimal(
                row.try_get::<Option<String>, _>("percentile_rank")?.as_deref(),
            )?,
            encounters: row.try_get("encounters")?,
            detected_at: parse_timestamp(&detected_at)
                .ok_or_else(|| Error::Internal(format!("Invalid detected_at in database: {}", detected_at)))?,
            temporal_node_id: row.try_get("temporal_node_id")?,
            entity_dimensions: entity_dimensions.map(|Json(d)| d),
            entity_dimensions_hash: row.try_get("entity_dimensions_hash")?,
            groupby_label: row.try_get("groupby_label")?,
            group_value: row.try_get("group_value")?,
            metric_trend_timeline: json_column(row, "metric_trend_timeline")?,
            trend_direction: row.try_get("trend_direction")?,
            simplified_signal_type: row.try_get("simplified_signal_type")?,
            simplified_severity: row.try_get("simplified_severity")?,
            simplified_severity_range: json_column(row, "simplified_severity_range")?,
            simplified_inputs: json_column(row, "simplified_inputs")?,
            simplified_indicators: json_column(row, "simplified_indicators")?,
            simplified_reasoning: row.try_get("simplified_reasoning")?,
            simplified_severity_calculation: json_column(row, "simplified_severity_calculation")?,
            metadata: json_column(row, "metadata")?,
            metadata_per_period: json_column(row, "metadata_per_period")?,
            peer_percentile_trends: json_column(row, "peer_percentile_trends")?,
            workflow_status: workflow_status.parse()?,
            workflow_notes: row.try_get("workflow_notes")?,
            assigned_to: row.try_get("assigned_to")?,
            import_revision: row.try_get("import_revision")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub fn hierarchy_level(&self) -> HierarchyLevel {
        HierarchyLevel::classify(self.service_line.as_deref(), self.sub_service_line.as_deref())
    }
}

fn json_column(row: &SqliteRow, column: &str) -> Result<Option<serde_json::Value>> {
    let value: Option<Json<serde_json::Value>> = row.try_get(column)?;
    Ok(value.map(|Json(v)| v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_mapping_defaults_to_efficiency() {
        assert_eq!(SignalDomain::from_mart(Some("Safety")), SignalDomain::Safety);
        assert_eq!(SignalDomain::from_mart(Some("Effectiveness")), SignalDomain::Effectiveness);
        assert_eq!(SignalDomain::from_mart(Some("Readmissions")), SignalDomain::Efficiency);
        assert_eq!(SignalDomain::from_mart(None), SignalDomain::Efficiency);
    }

    #[test]
    fn test_workflow_status_round_trip() {
        for status in [
            WorkflowStatus::New,
            WorkflowStatus::Assigned,
            WorkflowStatus::InProgress,
            WorkflowStatus::Resolved,
            WorkflowStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<WorkflowStatus>().unwrap(), status);
        }
        assert!("archived".parse::<WorkflowStatus>().is_err());
    }
}
