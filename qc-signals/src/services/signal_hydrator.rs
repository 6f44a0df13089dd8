//! Consolidation importer: `fct_signals` -> canonical `signals` table
//!
//! Mart rows are mapped to [`NewSignal`]s, split into batches that stay under
//! SQLite's bound-parameter ceiling and written with one multi-row upsert per
//! batch. Each batch is its own transaction. A row that cannot be mapped is
//! skipped and counted, as is every earlier row repeating a later row's
//! identity. A batch that cannot be written is rolled back and counted as
//! skipped; the next batch proceeds.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use qc_common::config::DEFAULT_IMPORT_BATCH_SIZE;
use qc_common::db::SignalDomain;
use qc_common::decimal::{parse_decimal, parse_optional_decimal};
use qc_common::hierarchy::{normalize_service_line, normalize_sub_service_line, FACILITY_WIDE};
use qc_common::identity::{effective_dimensions_hash, EntityDimensions, SignalIdentity};
use qc_common::time::parse_timestamp;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::db::{count_signals, max_batch_rows, upsert_signals, NewSignal, UpsertOutcome};
use crate::sources::{MartFilter, MartSignalRow, SignalSource};

/// A mart row that could not be mapped to a signal
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed signal {}/{}: {reason}", display_or_missing(.canonical_node_id), display_or_missing(.metric_id))]
pub struct MalformedRecord {
    pub canonical_node_id: Option<String>,
    pub metric_id: Option<String>,
    pub reason: String,
}

fn display_or_missing(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("<missing>")
}

/// Import options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrateOptions {
    pub run_id: Option<String>,
    pub facility_ids: Vec<String>,
    pub limit: Option<u32>,
    /// Rows per upsert statement; clamped to the parameter ceiling
    pub batch_size: usize,
}

impl Default for HydrateOptions {
    fn default() -> Self {
        Self {
            run_id: None,
            facility_ids: Vec::new(),
            limit: None,
            batch_size: DEFAULT_IMPORT_BATCH_SIZE,
        }
    }
}

impl HydrateOptions {
    fn filter(&self) -> MartFilter {
        MartFilter {
            run_id: self.run_id.clone(),
            facility_ids: self.facility_ids.clone(),
            limit: self.limit,
        }
    }
}

/// Outcome of one import run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Rows committed (`created + updated`)
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    /// Malformed rows, superseded duplicates and rows of failed batches
    pub skipped: usize,
    /// Upsert statements issued
    pub batches: usize,
}

/// Requested batch size bounded to `[1, max_batch_rows()]`
pub fn effective_batch_size(requested: usize) -> usize {
    requested.clamp(1, max_batch_rows())
}

/// Split `total` rows into consecutive batches of at most `batch_size`
pub fn plan_batches(total: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..total)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(total))
        .collect()
}

/// Keep the last record of each identity, counting earlier ones as skipped
///
/// One upsert statement cannot touch the same row twice, so a repeated
/// identity would otherwise fail its whole batch.
fn dedup_by_identity(records: Vec<NewSignal>, stats: &mut ImportStats) -> Vec<NewSignal> {
    let mut last_seen: HashMap<SignalIdentity, usize> = HashMap::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        if let Some(previous) = last_seen.insert(record.identity(), index) {
            debug!(previous, index, identity = %record.identity(), "Superseded duplicate identity");
        }
    }
    let duplicates = records.len() - last_seen.len();
    if duplicates > 0 {
        warn!(duplicates, "Mart returned repeated signal identities; keeping the last of each");
        stats.skipped += duplicates;
    }

    records
        .into_iter()
        .enumerate()
        .filter(|(index, record)| last_seen.get(&record.identity()) == Some(index))
        .map(|(_, record)| record)
        .collect()
}

/// Populates the signals table from the signal mart
pub struct SignalHydrator {
    db: SqlitePool,
    source: Arc<dyn SignalSource>,
    options: HydrateOptions,
}

impl SignalHydrator {
    pub fn new(db: SqlitePool, source: Arc<dyn SignalSource>, options: HydrateOptions) -> Self {
        Self { db, source, options }
    }

    /// Run one import
    ///
    /// Never fails: an unavailable or empty source yields zero stats and leaves
    /// the destination untouched.
    pub async fn hydrate(&self) -> ImportStats {
        let mut stats = ImportStats::default();

        let rows = match self.source.fetch_signals(&self.options.filter()).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to query fct_signals");
                info!("Ensure the analytics pipeline has run and fct_signals exists");
                return stats;
            }
        };

        if rows.is_empty() {
            warn!("No signals found in fct_signals");
            return stats;
        }
        info!(count = rows.len(), run_id = ?self.options.run_id, "Found signals in fct_signals");

        let mut prepared = Vec::with_capacity(rows.len());
        for row in &rows {
            match prepare_signal(row) {
                Ok(record) => prepared.push(record),
                Err(e) => {
                    warn!(
                        canonical_node_id = display_or_missing(&e.canonical_node_id),
                        metric_id = display_or_missing(&e.metric_id),
                        reason = %e.reason,
                        "Skipping malformed signal"
                    );
                    stats.skipped += 1;
                }
            }
        }
        let records = dedup_by_identity(prepared, &mut stats);

        let batch_size = effective_batch_size(self.options.batch_size);
        if batch_size != self.options.batch_size {
            warn!(requested = self.options.batch_size, batch_size, "Batch size clamped");
        }
        let batches = plan_batches(records.len(), batch_size);
        let total_batches = batches.len();

        for (index, range) in batches.into_iter().enumerate() {
            let batch = &records[range];
            stats.batches += 1;
            match self.write_batch(batch).await {
                Ok(outcome) => {
                    stats.created += outcome.created;
                    stats.updated += outcome.updated;
                    stats.processed += outcome.created + outcome.updated;
                    info!(
                        batch = index + 1,
                        total_batches,
                        created = outcome.created,
                        updated = outcome.updated,
                        "Batch committed"
                    );
                }
                Err(e) => {
                    error!(batch = index + 1, total_batches, rows = batch.len(), error = %e, "Failed to commit batch");
                    stats.skipped += batch.len();
                }
            }
        }

        info!(
            processed = stats.processed,
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            batches = stats.batches,
            "Signal hydration complete"
        );
        stats
    }

    /// One batch, all-or-nothing
    async fn write_batch(&self, records: &[NewSignal]) -> qc_common::Result<UpsertOutcome> {
        let mut tx = self.db.begin().await?;
        let outcome = upsert_signals(&mut *tx, records).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Rows available in the mart under the configured run/facility filter
    pub async fn source_count(&self) -> i64 {
        let filter = MartFilter {
            limit: None,
            ..self.options.filter()
        };
        match self.source.count_signals(&filter).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Could not count fct_signals");
                0
            }
        }
    }

    /// Rows in the destination table
    pub async fn signal_count(&self) -> qc_common::Result<i64> {
        count_signals(&self.db, None).await
    }
}

/// Map one mart row to an insertable signal
pub fn prepare_signal(row: &MartSignalRow) -> Result<NewSignal, MalformedRecord> {
    let malformed = |reason: String| MalformedRecord {
        canonical_node_id: row.canonical_node_id.clone(),
        metric_id: row.metric_id.clone(),
        reason,
    };

    let canonical_node_id = non_empty(&row.canonical_node_id)
        .ok_or_else(|| malformed("missing canonical_node_id".into()))?
        .to_string();
    let metric_id = non_empty(&row.metric_id)
        .ok_or_else(|| malformed("missing metric_id".into()))?
        .to_string();

    // A wall-clock fallback would mint a new identity on every import
    let detected_at = match (non_empty(&row.detected_at), non_empty(&row.dbt_updated_at)) {
        (Some(raw), _) => parse_timestamp(raw).ok_or_else(|| malformed(format!("unparseable detected_at '{raw}'")))?,
        (None, Some(raw)) => {
            parse_timestamp(raw).ok_or_else(|| malformed(format!("unparseable dbt_updated_at '{raw}'")))?
        }
        (None, None) => return Err(malformed("missing detected_at".into())),
    };

    let decimal = |field: &str, value: &Option<String>| {
        parse_optional_decimal(value.as_deref()).map_err(|e| malformed(format!("{field}: {e}")))
    };
    let integer = |field: &str, value: &Option<String>| {
        parse_integer(value.as_deref()).map_err(|reason| malformed(format!("{field}: {reason}")))
    };
    let json = |field: &str, value: &Option<String>| {
        parse_json(value.as_deref()).map_err(|e| malformed(format!("{field}: {e}")))
    };

    let entity_dimensions = match non_empty(&row.entity_dimensions) {
        None | Some("null") => None,
        Some(raw) => Some(EntityDimensions::parse(raw).map_err(|e| malformed(format!("entity_dimensions: {e}")))?),
    };
    let entity_dimensions_hash =
        effective_dimensions_hash(row.entity_dimensions_hash.as_deref(), entity_dimensions.as_ref());

    let metric_value = decimal("metric_value", &row.metric_value)?.unwrap_or(Decimal::ZERO);

    Ok(NewSignal {
        domain: SignalDomain::from_mart(row.domain.as_deref()),
        facility_id: non_empty(&row.facility_id).map(String::from),
        system_name: non_empty(&row.system_name).map(String::from),
        service_line: normalize_service_line(row.service_line.as_deref()).map(String::from),
        sub_service_line: normalize_sub_service_line(row.sub_service_line.as_deref()).map(String::from),
        description: non_empty(&row.description)
            .map(String::from)
            .unwrap_or_else(|| format!("{metric_id} anomaly detected")),
        metric_value,
        peer_mean: decimal("peer_mean", &row.peer_mean)?,
        peer_std: decimal("peer_std", &row.peer_std)?,
        percentile_rank: decimal("percentile_rank", &row.percentile_rank)?,
        encounters: integer("encounters", &row.encounters)?,
        detected_at,
        temporal_node_id: non_empty(&row.temporal_node_id).map(String::from),
        entity_dimensions,
        entity_dimensions_hash,
        groupby_label: non_empty(&row.groupby_label).unwrap_or(FACILITY_WIDE).to_string(),
        group_value: non_empty(&row.group_value).unwrap_or(FACILITY_WIDE).to_string(),
        metric_trend_timeline: json("metric_trend_timeline", &row.metric_trend_timeline)?,
        trend_direction: non_empty(&row.trend_direction).map(String::from),
        simplified_signal_type: non_empty(&row.simplified_signal_type).map(String::from),
        simplified_severity: integer("simplified_severity", &row.simplified_severity)?,
        simplified_severity_range: json("simplified_severity_range", &row.simplified_severity_range)?,
        simplified_inputs: json("simplified_inputs", &row.simplified_inputs)?,
        simplified_indicators: json("simplified_indicators", &row.simplified_indicators)?,
        simplified_reasoning: non_empty(&row.simplified_reasoning).map(String::from),
        simplified_severity_calculation: json("simplified_severity_calculation", &row.simplified_severity_calculation)?,
        metadata: json("metadata", &row.metadata)?,
        metadata_per_period: json("metadata_per_period", &row.metadata_per_period)?,
        peer_percentile_trends: json("peer_percentile_trends", &row.peer_percentile_trends)?,
        canonical_node_id,
        metric_id,
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Whole number, also accepting integral decimal text such as `"120.0"`
fn parse_integer(raw: Option<&str>) -> Result<Option<i64>, String> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if let Ok(value) = raw.parse::<i64>() {
        return Ok(Some(value));
    }
    let value = parse_decimal(raw).map_err(|e| e.to_string())?;
    if !value.fract().is_zero() {
        return Err(format!("'{raw}' is not a whole number"));
    }
    value
        .to_i64()
        .map(Some)
        .ok_or_else(|| format!("'{raw}' is out of range"))
}

fn parse_json(raw: Option<&str>) -> serde_json::Result<Option<Value>> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(text) => serde_json::from_str::<Value>(text).map(|v| Some(v).filter(|v| !v.is_null())),
    }
}
