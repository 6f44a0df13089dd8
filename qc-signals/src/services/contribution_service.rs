//! Attribution reconstructor
//!
//! Rebuilds the upward edge (how a signal feeds its parent aggregate) and the
//! downward edges (who feeds this signal) from the flattened rows of
//! `fct_contributions`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use qc_common::db::Signal;
use qc_common::hierarchy::{normalize_service_line, normalize_sub_service_line, HierarchyLevel};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::sources::{ContributionRow, ContributionSource, ParentQuery, UpwardQuery};

const DEFAULT_METHOD: &str = "weighted_mean";
const DEFAULT_WEIGHT_FIELD: &str = "encounters";

/// Contribution source failed or did not answer in time
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ContributionServiceError {
    pub message: String,
    /// Node being queried: the parent for downward lookups, the signal's own node for upward ones
    pub parent_node_id: Option<String>,
}

impl ContributionServiceError {
    pub fn new(message: impl Into<String>, parent_node_id: Option<&str>) -> Self {
        Self {
            message: message.into(),
            parent_node_id: parent_node_id.map(String::from),
        }
    }
}

/// Ordered `{dimension: value}` map reconstructed from flattened columns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entity(Vec<(String, String)>);

impl Entity {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Entity {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Entity from `(dimension, column value)` pairs, keeping populated columns in order
///
/// `None` when no column is populated.
pub fn reconstruct_entity(dimensions: &[(&str, Option<String>)]) -> Option<Entity> {
    let entity: Entity = dimensions
        .iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_string(), v.to_string()))
        })
        .collect();
    (!entity.is_empty()).then_some(entity)
}

/// One attribution edge
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContributionRecord {
    pub contribution_id: Option<String>,
    pub run_id: Option<String>,
    pub parent_node_id: String,
    pub child_node_id: Option<String>,
    pub metric_id: Option<String>,
    pub parent_entity: Entity,
    pub child_entity: Option<Entity>,
    pub method: String,
    pub child_value: Option<f64>,
    pub parent_value: Option<f64>,
    pub weight_field: String,
    pub weight_value: f64,
    /// Share of the parent's weight, 0..=1
    pub weight_share: f64,
    pub excess_over_parent: Option<f64>,
    pub contribution_weight: Option<f64>,
    pub contribution_direction: Option<String>,
    pub contribution_rank: Option<i64>,
    /// `contribution_pct / 100`
    pub contribution_value: Option<f64>,
}

impl ContributionRecord {
    pub fn from_row(row: ContributionRow) -> Self {
        Self {
            parent_entity: reconstruct_entity(&row.parent_dimensions).unwrap_or_default(),
            child_entity: reconstruct_entity(&row.child_dimensions),
            contribution_id: row.contribution_id,
            run_id: row.run_id,
            parent_node_id: row.parent_node_id.unwrap_or_default(),
            child_node_id: row.child_node_id,
            metric_id: row.metric_id,
            method: row
                .contribution_method
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_METHOD.to_string()),
            child_value: row.child_value,
            parent_value: row.parent_value,
            weight_field: row
                .weight_field
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| DEFAULT_WEIGHT_FIELD.to_string()),
            weight_value: row.weight_value.unwrap_or(0.0),
            weight_share: row.weight_share.unwrap_or(0.0),
            excess_over_parent: row.excess_over_parent,
            contribution_weight: row.contribution_weight,
            contribution_direction: row.contribution_direction,
            contribution_rank: row.contribution_rank,
            contribution_value: row.contribution_pct.map(|pct| pct / 100.0),
        }
    }
}

/// Field used by [`top_contributors`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    ExcessOverParent,
    WeightShare,
    ContributionValue,
}

impl SortField {
    fn value(&self, record: &ContributionRecord) -> Option<f64> {
        match self {
            SortField::ExcessOverParent => record.excess_over_parent,
            SortField::WeightShare => Some(record.weight_share),
            SortField::ContributionValue => record.contribution_value,
        }
    }
}

/// Largest-impact records first: absolute value of `sort_by`, descending
///
/// Records without a value for the field are dropped. Ties keep input order.
pub fn top_contributors(records: &[ContributionRecord], top_n: usize, sort_by: SortField) -> Vec<ContributionRecord> {
    let mut ranked: Vec<(f64, &ContributionRecord)> = records
        .iter()
        .filter_map(|r| sort_by.value(r).filter(|v| !v.is_nan()).map(|v| (v.abs(), r)))
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
    ranked.into_iter().take(top_n).map(|(_, r)| r.clone()).collect()
}

/// Upward and downward edges of one signal
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchicalContributions {
    pub upward: Option<ContributionRecord>,
    pub downward: Vec<ContributionRecord>,
    pub level: HierarchyLevel,
}

impl HierarchicalContributions {
    /// Re-rank the downward edges by impact instead of contribution rank
    pub fn rerank(mut self, top_n: usize, sort_by: SortField) -> Self {
        self.downward = top_contributors(&self.downward, top_n, sort_by);
        self
    }
}

/// Queries the contribution source with a per-query deadline
pub struct ContributionService {
    source: Arc<dyn ContributionSource>,
    query_timeout: Duration,
}

impl ContributionService {
    pub fn new(source: Arc<dyn ContributionSource>, query_timeout: Duration) -> Self {
        Self { source, query_timeout }
    }

    async fn bounded<T>(
        &self,
        node_id: Option<&str>,
        query: impl Future<Output = qc_common::Result<T>>,
    ) -> Result<T, ContributionServiceError> {
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ContributionServiceError::new(
                format!("Failed to query contributions: {e}"),
                node_id,
            )),
            Err(_) => Err(ContributionServiceError::new(
                format!(
                    "Contribution query timed out after {} ms",
                    self.query_timeout.as_millis()
                ),
                node_id,
            )),
        }
    }

    /// Edges feeding one parent aggregate, in contribution-rank order
    ///
    /// A `parent_service_line` of `None` (or a sentinel) matches facility-wide
    /// parents only, so sibling service lines never leak in.
    pub async fn contributions_for_parent(
        &self,
        parent_node_id: &str,
        parent_facility_id: &str,
        parent_service_line: Option<&str>,
        top_n: Option<usize>,
    ) -> Result<Vec<ContributionRecord>, ContributionServiceError> {
        let query = ParentQuery {
            parent_node_id: parent_node_id.to_string(),
            parent_facility_id: parent_facility_id.to_string(),
            parent_service_line: normalize_service_line(parent_service_line).map(String::from),
        };

        let rows = self
            .bounded(Some(parent_node_id), self.source.contributions_by_parent(&query))
            .await
            .inspect_err(|e| {
                error!(
                    parent_node_id,
                    parent_facility_id,
                    parent_service_line = ?query.parent_service_line,
                    error = %e,
                    "Contribution query failed"
                );
            })?;

        let mut records: Vec<ContributionRecord> = rows.into_iter().map(ContributionRecord::from_row).collect();
        if let Some(top_n) = top_n {
            records.truncate(top_n);
        }

        debug!(
            parent_node_id,
            parent_facility_id,
            count = records.len(),
            "Found contributions for parent"
        );
        Ok(records)
    }

    /// The edge where the described signal is the child, if any
    ///
    /// Failures carry `child_node_id`, the node whose lineage was requested.
    pub async fn upward_contribution(
        &self,
        child_node_id: &str,
        child_facility_id: &str,
        child_service_line: Option<&str>,
        child_sub_service_line: Option<&str>,
        metric_id: &str,
    ) -> Result<Option<ContributionRecord>, ContributionServiceError> {
        let query = UpwardQuery {
            child_facility_id: child_facility_id.to_string(),
            metric_id: metric_id.to_string(),
            child_service_line: normalize_service_line(child_service_line).map(String::from),
            child_sub_service_line: normalize_sub_service_line(child_sub_service_line).map(String::from),
        };

        let row = self
            .bounded(Some(child_node_id), self.source.upward_contribution(&query))
            .await
            .inspect_err(|e| {
                error!(
                    child_node_id,
                    child_facility_id,
                    child_service_line = ?query.child_service_line,
                    metric_id,
                    error = %e,
                    "Upward contribution query failed"
                );
            })?;

        if row.is_none() {
            debug!(child_facility_id, metric_id, "No upward contribution");
        }
        Ok(row.map(ContributionRecord::from_row))
    }

    /// Both directions for one signal; downward edges truncated to `top_n` ranks
    ///
    /// Facility-level signals have no parent, so no upward query is issued.
    pub async fn hierarchy_for(
        &self,
        signal: &Signal,
        top_n: usize,
    ) -> Result<HierarchicalContributions, ContributionServiceError> {
        let level = signal.hierarchy_level();
        let facility_id = signal.facility_id.as_deref().unwrap_or_default();

        // Sub-service-line signals aggregate within their parent service line
        let parent_service_line = match level {
            HierarchyLevel::Facility => None,
            HierarchyLevel::ServiceLine | HierarchyLevel::SubServiceLine => signal.service_line.as_deref(),
        };

        let downward = self.contributions_for_parent(
            &signal.canonical_node_id,
            facility_id,
            parent_service_line,
            Some(top_n),
        );

        let (upward, downward) = if level.has_parent() {
            let upward = self.upward_contribution(
                &signal.canonical_node_id,
                facility_id,
                signal.service_line.as_deref(),
                signal.sub_service_line.as_deref(),
                &signal.metric_id,
            );
            tokio::try_join!(upward, downward)?
        } else {
            (None, downward.await?)
        };

        info!(
            signal = %signal.guid,
            level = %level,
            upward = upward.is_some(),
            downward = downward.len(),
            "Hierarchical contributions"
        );

        Ok(HierarchicalContributions { upward, downward, level })
    }

    /// Rank-1 edges across all parents, heaviest first; empty when the source fails
    pub async fn top_contributors_global(&self, top_n: u32) -> Vec<ContributionRecord> {
        match self.bounded(None, self.source.top_contributors(top_n)).await {
            Ok(rows) => {
                debug!(count = rows.len(), "Found top contributors");
                rows.into_iter().map(ContributionRecord::from_row).collect()
            }
            Err(e) => {
                warn!(error = %e, "Failed to query top contributors");
                Vec::new()
            }
        }
    }
}
