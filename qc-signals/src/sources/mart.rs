//! SQLite-backed mart adapter

use async_trait::async_trait;
use qc_common::Result;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use super::records::{
    contribution_select, mart_signal_select, ContributionRow, MartSignalRow, TechnicalDetailsRow,
    TECHNICAL_DETAILS_SELECT,
};
use super::{ContributionSource, MartFilter, ParentQuery, SignalSource, UpwardQuery};

/// Reads `fct_signals` and `fct_contributions` from an analytics database
#[derive(Clone)]
pub struct SqliteMart {
    pool: SqlitePool,
    /// Restricts contribution queries to one pipeline run
    run_id: Option<String>,
}

impl SqliteMart {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, run_id: None }
    }

    pub fn with_run_id(mut self, run_id: Option<String>) -> Self {
        self.run_id = run_id;
        self
    }

    fn push_run_filter(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(run_id) = &self.run_id {
            qb.push(" AND run_id = ").push_bind(run_id.clone());
        }
    }
}

/// `column = ?` when a value is supplied, `column IS NULL` otherwise
fn push_nullable_eq(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, value: Option<&str>) {
    match value {
        Some(value) => {
            qb.push(format!(" AND {column} = ")).push_bind(value.to_string());
        }
        None => {
            qb.push(format!(" AND {column} IS NULL"));
        }
    }
}

fn push_signal_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &MartFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(run_id) = &filter.run_id {
        qb.push(" AND run_id = ").push_bind(run_id.clone());
    }
    if !filter.facility_ids.is_empty() {
        qb.push(" AND facility_id IN (");
        let mut ids = qb.separated(", ");
        for id in &filter.facility_ids {
            ids.push_bind(id.clone());
        }
        ids.push_unseparated(")");
    }
}

#[async_trait]
impl SignalSource for SqliteMart {
    async fn fetch_signals(&self, filter: &MartFilter) -> Result<Vec<MartSignalRow>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM fct_signals", mart_signal_select()));
        push_signal_filter(&mut qb, filter);
        qb.push(" ORDER BY canonical_node_id, metric_id");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        debug!(rows = rows.len(), "Fetched fct_signals");

        rows.iter()
            .map(|row| MartSignalRow::from_row(row).map_err(qc_common::Error::from))
            .collect()
    }

    async fn count_signals(&self, filter: &MartFilter) -> Result<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM fct_signals");
        push_signal_filter(&mut qb, filter);
        let count = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn technical_details(
        &self,
        canonical_node_id: &str,
        entity_dimensions_hash: Option<&str>,
    ) -> Result<Option<TechnicalDetailsRow>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM fct_signals WHERE canonical_node_id = ",
            TECHNICAL_DETAILS_SELECT
        ));
        qb.push_bind(canonical_node_id.to_string());

        let Some(hash) = entity_dimensions_hash else {
            // Legacy lookup: lowest entity hash, then earliest detection
            qb.push(" ORDER BY entity_dimensions_hash, detected_at LIMIT 1");
            let row = qb.build().fetch_optional(&self.pool).await?;
            return row
                .map(|r| TechnicalDetailsRow::from_row(&r))
                .transpose()
                .map_err(qc_common::Error::from);
        };

        // Rows without a recorded hash were imported under the hash of their dimensions
        qb.push(" AND (entity_dimensions_hash = ")
            .push_bind(hash.to_string())
            .push(" OR COALESCE(TRIM(entity_dimensions_hash), '') = '')");
        qb.push(" ORDER BY COALESCE(TRIM(entity_dimensions_hash), '') = '', detected_at");

        let rows = qb.build().fetch_all(&self.pool).await?;
        for row in &rows {
            let details = TechnicalDetailsRow::from_row(row)?;
            if details.effective_hash().as_deref() == Some(hash) {
                return Ok(Some(details));
            }
        }
        debug!(canonical_node_id, hash, candidates = rows.len(), "No technical details for entity");
        Ok(None)
    }
}

#[async_trait]
impl ContributionSource for SqliteMart {
    async fn contributions_by_parent(&self, query: &ParentQuery) -> Result<Vec<ContributionRow>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM fct_contributions WHERE parent_node_id = ",
            contribution_select()
        ));
        qb.push_bind(query.parent_node_id.clone());
        self.push_run_filter(&mut qb);
        qb.push(" AND parent_facility_id = ")
            .push_bind(query.parent_facility_id.clone());
        push_nullable_eq(&mut qb, "parent_service_line", query.parent_service_line.as_deref());
        qb.push(" ORDER BY contribution_rank");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| ContributionRow::from_row(row).map_err(qc_common::Error::from))
            .collect()
    }

    async fn upward_contribution(&self, query: &UpwardQuery) -> Result<Option<ContributionRow>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM fct_contributions WHERE child_facility_id = ",
            contribution_select()
        ));
        qb.push_bind(query.child_facility_id.clone());
        self.push_run_filter(&mut qb);
        qb.push(" AND metric_id = ").push_bind(query.metric_id.clone());
        push_nullable_eq(&mut qb, "child_service_line", query.child_service_line.as_deref());
        push_nullable_eq(&mut qb, "child_sub_service_line", query.child_sub_service_line.as_deref());
        qb.push(" ORDER BY contribution_rank LIMIT 1");

        let row = qb.build().fetch_optional(&self.pool).await?;
        row.map(|r| ContributionRow::from_row(&r))
            .transpose()
            .map_err(qc_common::Error::from)
    }

    async fn top_contributors(&self, top_n: u32) -> Result<Vec<ContributionRow>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM fct_contributions WHERE contribution_rank = 1",
            contribution_select()
        ));
        self.push_run_filter(&mut qb);
        qb.push(" ORDER BY contribution_weight DESC LIMIT ")
            .push_bind(i64::from(top_n));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| ContributionRow::from_row(row).map_err(qc_common::Error::from))
            .collect()
    }
}
