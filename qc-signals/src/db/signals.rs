//! Signal table operations
//!
//! The importer writes analytic and hierarchy columns through
//! [`upsert_signals`]; the workflow subsystem writes workflow columns through
//! [`update_workflow`]. Neither statement touches the other's column set.

use chrono::{DateTime, Utc};
use qc_common::db::{Signal, SignalDomain, WorkflowStatus, SIGNAL_COLUMNS};
use qc_common::identity::{EntityDimensions, SignalIdentity};
use qc_common::time::format_timestamp;
use qc_common::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::pagination::{PageRequest, PageWindow};

/// SQLite's bound-parameter ceiling per statement
pub const MAX_BIND_PARAMETERS: usize = 32_766;

/// Columns bound per row by [`upsert_signals`], in bind order
pub const UPSERT_COLUMNS: [&str; 32] = [
    "guid",
    "canonical_node_id",
    "metric_id",
    "domain",
    "facility_id",
    "system_name",
    "service_line",
    "sub_service_line",
    "description",
    "metric_value",
    "peer_mean",
    "peer_std",
    "percentile_rank",
    "encounters",
    "detected_at",
    "temporal_node_id",
    "entity_dimensions",
    "entity_dimensions_hash",
    "groupby_label",
    "group_value",
    "metric_trend_timeline",
    "trend_direction",
    "simplified_signal_type",
    "simplified_severity",
    "simplified_severity_range",
    "simplified_inputs",
    "simplified_indicators",
    "simplified_reasoning",
    "simplified_severity_calculation",
    "metadata",
    "metadata_per_period",
    "peer_percentile_trends",
];

/// Identity tuple; the conflict target of the upsert
const IDENTITY_COLUMNS: [&str; 5] = [
    "canonical_node_id",
    "metric_id",
    "facility_id",
    "entity_dimensions_hash",
    "detected_at",
];

const NOW_SQL: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// Largest batch that stays under [`MAX_BIND_PARAMETERS`]
pub fn max_batch_rows() -> usize {
    MAX_BIND_PARAMETERS / UPSERT_COLUMNS.len()
}

/// Signal prepared for insert-or-update
#[derive(Debug, Clone, PartialEq)]
pub struct NewSignal {
    pub canonical_node_id: String,
    pub metric_id: String,
    pub domain: SignalDomain,
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
    pub groupby_label: String,
    pub group_value: String,
    pub metric_trend_timeline: Option<Value>,
    pub trend_direction: Option<String>,
    pub simplified_signal_type: Option<String>,
    pub simplified_severity: Option<i64>,
    pub simplified_severity_range: Option<Value>,
    pub simplified_inputs: Option<Value>,
    pub simplified_indicators: Option<Value>,
    pub simplified_reasoning: Option<String>,
    pub simplified_severity_calculation: Option<Value>,
    pub metadata: Option<Value>,
    pub metadata_per_period: Option<Value>,
    pub peer_percentile_trends: Option<Value>,
}

impl NewSignal {
    pub fn identity(&self) -> SignalIdentity {
        SignalIdentity {
            canonical_node_id: self.canonical_node_id.clone(),
            metric_id: self.metric_id.clone(),
            facility_id: self.facility_id.clone(),
            entity_dimensions_hash: self.entity_dimensions_hash.clone(),
            detected_at: self.detected_at,
        }
    }
}

/// Rows inserted vs. rows that hit an existing identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub created: usize,
    pub updated: usize,
}

fn json_text(value: &Option<Value>) -> Option<String> {
    value.as_ref().map(Value::to_string)
}

fn decimal_text(value: &Option<Decimal>) -> Option<String> {
    value.as_ref().map(Decimal::to_string)
}

/// Multi-row insert-or-update keyed by the identity tuple
///
/// Runs on the caller's connection so the caller owns the transaction. Every
/// row reports its `import_revision` back: 1 means the row was just inserted.
pub async fn upsert_signals(conn: &mut SqliteConnection, records: &[NewSignal]) -> Result<UpsertOutcome> {
    if records.is_empty() {
        return Ok(UpsertOutcome::default());
    }
    if records.len() > max_batch_rows() {
        return Err(Error::InvalidInput(format!(
            "batch of {} rows exceeds the {} row limit",
            records.len(),
            max_batch_rows()
        )));
    }

    let mut qb = QueryBuilder::<Sqlite>::new(format!("INSERT INTO signals ({}) ", UPSERT_COLUMNS.join(", ")));

    qb.push_values(records, |mut row, r| {
        let dimensions = r
            .entity_dimensions
            .as_ref()
            .filter(|d| !d.is_empty())
            .and_then(|d| serde_json::to_string(d).ok());

        row.push_bind(Uuid::new_v4().to_string())
            .push_bind(r.canonical_node_id.clone())
            .push_bind(r.metric_id.clone())
            .push_bind(r.domain.as_str())
            .push_bind(r.facility_id.clone().unwrap_or_default())
            .push_bind(r.system_name.clone())
            .push_bind(r.service_line.clone())
            .push_bind(r.sub_service_line.clone())
            .push_bind(r.description.clone())
            .push_bind(r.metric_value.to_string())
            .push_bind(decimal_text(&r.peer_mean))
            .push_bind(decimal_text(&r.peer_std))
            .push_bind(decimal_text(&r.percentile_rank))
            .push_bind(r.encounters)
            .push_bind(format_timestamp(&r.detected_at))
            .push_bind(r.temporal_node_id.clone())
            .push_bind(dimensions)
            .push_bind(r.entity_dimensions_hash.clone())
            .push_bind(r.groupby_label.clone())
            .push_bind(r.group_value.clone())
            .push_bind(json_text(&r.metric_trend_timeline))
            .push_bind(r.trend_direction.clone())
            .push_bind(r.simplified_signal_type.clone())
            .push_bind(r.simplified_severity)
            .push_bind(json_text(&r.simplified_severity_range))
            .push_bind(json_text(&r.simplified_inputs))
            .push_bind(json_text(&r.simplified_indicators))
            .push_bind(r.simplified_reasoning.clone())
            .push_bind(json_text(&r.simplified_severity_calculation))
            .push_bind(json_text(&r.metadata))
            .push_bind(json_text(&r.metadata_per_period))
            .push_bind(json_text(&r.peer_percentile_trends));
    });

    let updates: Vec<String> = UPSERT_COLUMNS
        .iter()
        .filter(|c| **c != "guid" && !IDENTITY_COLUMNS.contains(c))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    qb.push(format!(
        " ON CONFLICT({}) DO UPDATE SET {}, import_revision = signals.import_revision + 1, updated_at = {} RETURNING import_revision",
        IDENTITY_COLUMNS.join(", "),
        updates.join(", "),
        NOW_SQL
    ));

    let revisions: Vec<i64> = qb.build_query_scalar().fetch_all(&mut *conn).await?;

    let created = revisions.iter().filter(|r| **r == 1).count();
    Ok(UpsertOutcome {
        created,
        updated: revisions.len() - created,
    })
}

/// Load one signal by id
pub async fn load_signal(pool: &SqlitePool, guid: Uuid) -> Result<Option<Signal>> {
    let row = sqlx::query(&format!("SELECT {} FROM signals WHERE guid = ?", SIGNAL_COLUMNS))
        .bind(guid.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(Signal::from_row).transpose()
}

/// Filters for the signal list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignalFilter {
    pub facility_id: Option<String>,
    pub metric_id: Option<String>,
    pub domain: Option<SignalDomain>,
    pub workflow_status: Option<WorkflowStatus>,
}

impl SignalFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(facility_id) = &self.facility_id {
            qb.push(" AND facility_id = ").push_bind(facility_id.clone());
        }
        if let Some(metric_id) = &self.metric_id {
            qb.push(" AND metric_id = ").push_bind(metric_id.clone());
        }
        if let Some(domain) = self.domain {
            qb.push(" AND domain = ").push_bind(domain.as_str());
        }
        if let Some(status) = self.workflow_status {
            qb.push(" AND workflow_status = ").push_bind(status.as_str());
        }
    }
}

/// One page of signals
#[derive(Debug, Clone)]
pub struct SignalPage {
    pub signals: Vec<Signal>,
    pub window: PageWindow,
}

/// Newest first; the page is fitted to the filtered row count
pub async fn list_signals(
    pool: &SqlitePool,
    filter: &SignalFilter,
    page: impl Into<PageRequest>,
) -> Result<SignalPage> {
    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM signals");
    filter.push_where(&mut count_qb);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let window = PageWindow::fit(total, page.into());

    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM signals", SIGNAL_COLUMNS));
    filter.push_where(&mut qb);
    qb.push(" ORDER BY detected_at DESC, canonical_node_id, metric_id LIMIT ")
        .push_bind(window.page_size)
        .push(" OFFSET ")
        .push_bind(window.offset());

    let rows = qb.build().fetch_all(pool).await?;
    let signals = rows.iter().map(Signal::from_row).collect::<Result<Vec<_>>>()?;

    Ok(SignalPage { signals, window })
}

/// Number of stored signals, optionally for one facility
pub async fn count_signals(pool: &SqlitePool, facility_id: Option<&str>) -> Result<i64> {
    let count = match facility_id {
        Some(facility_id) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM signals WHERE facility_id = ?")
                .bind(facility_id)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM signals")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

/// Workflow change; absent fields are left as they are
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowUpdate {
    pub status: Option<WorkflowStatus>,
    pub notes: Option<String>,
    pub assigned_to: Option<String>,
}

/// Apply a workflow change; `None` when the signal does not exist
pub async fn update_workflow(pool: &SqlitePool, guid: Uuid, update: &WorkflowUpdate) -> Result<Option<Signal>> {
    let result = sqlx::query(&format!(
        r#"
        UPDATE signals SET
            workflow_status = COALESCE(?, workflow_status),
            workflow_notes = COALESCE(?, workflow_notes),
            assigned_to = COALESCE(?, assigned_to),
            updated_at = {}
        WHERE guid = ?
        "#,
        NOW_SQL
    ))
    .bind(update.status.map(|s| s.as_str()))
    .bind(&update.notes)
    .bind(&update.assigned_to)
    .bind(guid.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    load_signal(pool, guid).await
}
