//! Read-only adapters over the analytics marts
//!
//! The importer and the attribution reconstructor depend on the traits here,
//! not on SQLite, so both can be driven by in-memory fakes in tests.

pub mod mart;
pub mod records;
pub mod schema;

pub use mart::SqliteMart;
pub use records::{ContributionRow, MartSignalRow, TechnicalDetailsRow};

use async_trait::async_trait;
use qc_common::Result;

/// Filter applied to the signal mart
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MartFilter {
    /// Restrict to one pipeline run
    pub run_id: Option<String>,
    /// Facility allow-list; empty means every facility
    pub facility_ids: Vec<String>,
    /// Cap on rows read
    pub limit: Option<u32>,
}

/// Lookup of contributions feeding one parent aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentQuery {
    pub parent_node_id: String,
    pub parent_facility_id: String,
    /// `None` matches facility-wide parents only
    pub parent_service_line: Option<String>,
}

/// Lookup of the edge where a signal is the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpwardQuery {
    pub child_facility_id: String,
    pub metric_id: String,
    pub child_service_line: Option<String>,
    pub child_sub_service_line: Option<String>,
}

/// Source of externally computed signals (`fct_signals`)
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Every row under the filter, ordered by node id then metric id
    async fn fetch_signals(&self, filter: &MartFilter) -> Result<Vec<MartSignalRow>>;

    /// Number of rows under the filter
    async fn count_signals(&self, filter: &MartFilter) -> Result<i64>;

    /// Statistical payload of one signal
    ///
    /// The hash is matched the way the importer derives it, so rows without a
    /// recorded hash match on the hash of their dimensions. With no hash, the
    /// node's row with the lowest hash and earliest detection.
    async fn technical_details(
        &self,
        canonical_node_id: &str,
        entity_dimensions_hash: Option<&str>,
    ) -> Result<Option<TechnicalDetailsRow>>;
}

/// Source of attribution edges (`fct_contributions`)
#[async_trait]
pub trait ContributionSource: Send + Sync {
    /// All edges into the parent, ordered by contribution rank
    async fn contributions_by_parent(&self, query: &ParentQuery) -> Result<Vec<ContributionRow>>;

    /// Best-ranked edge where the described signal is the child
    async fn upward_contribution(&self, query: &UpwardQuery) -> Result<Option<ContributionRow>>;

    /// Rank-1 edges across all parents, heaviest first
    async fn top_contributors(&self, top_n: u32) -> Result<Vec<ContributionRow>>;
}
