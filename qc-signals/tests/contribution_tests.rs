//! Integration tests for the attribution reconstructor
//!
//! A counting in-memory source checks which queries are issued per hierarchy
//! level; the SQLite mart checks ranking and scoping end to end.

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use helpers::{create_test_db, insert_edge, sample_signal, Edge};
use qc_common::HierarchyLevel;
use qc_signals::services::ContributionService;
use qc_signals::sources::{ContributionRow, ContributionSource, ParentQuery, SqliteMart, UpwardQuery};

#[derive(Default)]
struct FakeSource {
    parent_calls: AtomicUsize,
    upward_calls: AtomicUsize,
    parent_queries: Mutex<Vec<ParentQuery>>,
    upward_queries: Mutex<Vec<UpwardQuery>>,
    downward: Vec<ContributionRow>,
    upward: Option<ContributionRow>,
    fail: bool,
    fail_upward: bool,
    delay: Option<Duration>,
}

impl FakeSource {
    async fn maybe_fail(&self) -> qc_common::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(qc_common::Error::Internal("mart offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContributionSource for FakeSource {
    async fn contributions_by_parent(&self, query: &ParentQuery) -> qc_common::Result<Vec<ContributionRow>> {
        self.parent_calls.fetch_add(1, Ordering::SeqCst);
        self.parent_queries.lock().unwrap().push(query.clone());
        self.maybe_fail().await?;
        Ok(self.downward.clone())
    }

    async fn upward_contribution(&self, query: &UpwardQuery) -> qc_common::Result<Option<ContributionRow>> {
        self.upward_calls.fetch_add(1, Ordering::SeqCst);
        self.upward_queries.lock().unwrap().push(query.clone());
        self.maybe_fail().await?;
        if self.fail_upward {
            return Err(qc_common::Error::Internal("upward edges unavailable".into()));
        }
        Ok(self.upward.clone())
    }

    async fn top_contributors(&self, _top_n: u32) -> qc_common::Result<Vec<ContributionRow>> {
        self.maybe_fail().await?;
        Ok(self.downward.clone())
    }
}

fn row(parent_node_id: &str, rank: i64) -> ContributionRow {
    ContributionRow {
        parent_node_id: Some(parent_node_id.to_string()),
        metric_id: Some("losIndex".to_string()),
        parent_dimensions: vec![("medicareId", Some("AFP658".into())), ("vizientServiceLine", None)],
        child_dimensions: vec![
            ("medicareId", Some("AFP658".into())),
            ("vizientServiceLine", Some(format!("Line {rank}"))),
        ],
        weight_share: Some(0.2),
        excess_over_parent: Some(0.01 * rank as f64),
        contribution_rank: Some(rank),
        ..Default::default()
    }
}

fn service(source: Arc<FakeSource>) -> ContributionService {
    ContributionService::new(source, Duration::from_secs(5))
}

#[tokio::test]
async fn test_facility_signal_issues_no_upward_query() {
    let source = Arc::new(FakeSource {
        downward: vec![row("n", 1), row("n", 2)],
        ..Default::default()
    });
    let signal = sample_signal(None, None);

    let result = service(source.clone()).hierarchy_for(&signal, 10).await.unwrap();

    assert_eq!(result.level, HierarchyLevel::Facility);
    assert!(result.upward.is_none());
    assert_eq!(result.downward.len(), 2);
    assert_eq!(source.upward_calls.load(Ordering::SeqCst), 0);
    assert_eq!(source.parent_calls.load(Ordering::SeqCst), 1);

    let queries = source.parent_queries.lock().unwrap();
    assert_eq!(queries[0].parent_facility_id, "AFP658");
    assert_eq!(queries[0].parent_service_line, None);
}

#[tokio::test]
async fn test_service_line_signal_queries_both_directions() {
    let source = Arc::new(FakeSource {
        downward: vec![row("n", 1)],
        upward: Some(row("losIndex__medicareId", 3)),
        ..Default::default()
    });
    let signal = sample_signal(Some("Cardiology"), None);

    let result = service(source.clone()).hierarchy_for(&signal, 10).await.unwrap();

    assert_eq!(result.level, HierarchyLevel::ServiceLine);
    assert_eq!(source.upward_calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.parent_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        result.upward.as_ref().map(|r| r.parent_node_id.as_str()),
        Some("losIndex__medicareId")
    );

    let upward = source.upward_queries.lock().unwrap();
    assert_eq!(upward[0].child_facility_id, "AFP658");
    assert_eq!(upward[0].child_service_line.as_deref(), Some("Cardiology"));
    assert_eq!(upward[0].child_sub_service_line, None);
    assert_eq!(upward[0].metric_id, "losIndex");

    let parent = source.parent_queries.lock().unwrap();
    assert_eq!(parent[0].parent_service_line.as_deref(), Some("Cardiology"));
}

#[tokio::test]
async fn test_sub_service_line_signal_scopes_to_parent_line() {
    let source = Arc::new(FakeSource::default());
    let signal = sample_signal(Some("Cardiology"), Some("Interventional Cardiology"));

    let result = service(source.clone()).hierarchy_for(&signal, 10).await.unwrap();

    assert_eq!(result.level, HierarchyLevel::SubServiceLine);
    assert!(result.downward.is_empty());
    assert!(result.upward.is_none());

    let parent = source.parent_queries.lock().unwrap();
    assert_eq!(parent[0].parent_service_line.as_deref(), Some("Cardiology"));
    let upward = source.upward_queries.lock().unwrap();
    assert_eq!(
        upward[0].child_sub_service_line.as_deref(),
        Some("Interventional Cardiology")
    );
}

#[tokio::test]
async fn test_downward_truncated_to_top_n() {
    let source = Arc::new(FakeSource {
        downward: (1..=5).map(|rank| row("n", rank)).collect(),
        ..Default::default()
    });
    let signal = sample_signal(None, None);

    let result = service(source).hierarchy_for(&signal, 3).await.unwrap();

    let ranks: Vec<Option<i64>> = result.downward.iter().map(|r| r.contribution_rank).collect();
    assert_eq!(ranks, vec![Some(1), Some(2), Some(3)]);
}

#[tokio::test]
async fn test_source_failure_carries_parent_node_id() {
    let source = Arc::new(FakeSource {
        fail: true,
        ..Default::default()
    });
    let svc = service(source);

    let err = svc
        .contributions_for_parent("losIndex__medicareId", "AFP658", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.parent_node_id.as_deref(), Some("losIndex__medicareId"));
    assert!(err.message.contains("mart offline"));

    let signal = sample_signal(Some("Cardiology"), None);
    assert!(svc.hierarchy_for(&signal, 10).await.is_err());
}

#[tokio::test]
async fn test_upward_failure_carries_signal_node_id() {
    let source = Arc::new(FakeSource {
        downward: vec![row("n", 1)],
        fail_upward: true,
        ..Default::default()
    });
    let signal = sample_signal(Some("Cardiology"), None);

    let err = service(source).hierarchy_for(&signal, 10).await.unwrap_err();

    assert_eq!(err.parent_node_id.as_deref(), Some(signal.canonical_node_id.as_str()));
    assert!(err.message.contains("upward edges unavailable"), "{}", err.message);
}

#[tokio::test]
async fn test_slow_source_times_out() {
    let source = Arc::new(FakeSource {
        delay: Some(Duration::from_millis(500)),
        ..Default::default()
    });
    let svc = ContributionService::new(source, Duration::from_millis(20));

    let err = svc
        .contributions_for_parent("losIndex__medicareId", "AFP658", None, None)
        .await
        .unwrap_err();

    assert!(err.message.contains("timed out"), "{}", err.message);
    assert_eq!(err.parent_node_id.as_deref(), Some("losIndex__medicareId"));
}

#[tokio::test]
async fn test_top_contributors_global_degrades_to_empty() {
    let failing = service(Arc::new(FakeSource {
        fail: true,
        ..Default::default()
    }));
    assert!(failing.top_contributors_global(10).await.is_empty());

    let working = service(Arc::new(FakeSource {
        downward: vec![row("n", 1)],
        ..Default::default()
    }));
    assert_eq!(working.top_contributors_global(10).await.len(), 1);
}

#[tokio::test]
async fn test_mart_orders_by_rank_and_truncates() {
    let pool = create_test_db().await;
    for rank in [3, 1, 2] {
        let mut edge = Edge::new("losIndex__medicareId", "AFP658", rank);
        edge.child_service_line = Some(format!("Line {rank}"));
        insert_edge(&pool, &edge).await;
    }
    let svc = ContributionService::new(Arc::new(SqliteMart::new(pool)), Duration::from_secs(5));

    let records = svc
        .contributions_for_parent("losIndex__medicareId", "AFP658", None, Some(2))
        .await
        .unwrap();

    let ranks: Vec<Option<i64>> = records.iter().map(|r| r.contribution_rank).collect();
    assert_eq!(ranks, vec![Some(1), Some(2)]);
    assert_eq!(records[0].method, "weighted_mean");
    assert_eq!(records[0].weight_field, "encounters");
    assert_eq!(records[0].parent_entity.get("medicareId"), Some("AFP658"));
    let child = records[0].child_entity.as_ref().unwrap();
    assert_eq!(child.get("vizientServiceLine"), Some("Line 1"));
}

#[tokio::test]
async fn test_mart_keeps_sibling_service_lines_apart() {
    let pool = create_test_db().await;

    let facility_edge = Edge::new("losIndex__medicareId__vizientServiceLine", "AFP658", 1);
    insert_edge(&pool, &facility_edge).await;

    let mut cardiology = Edge::new("losIndex__medicareId__vizientServiceLine", "AFP658", 1);
    cardiology.parent_service_line = Some("Cardiology".into());
    cardiology.child_service_line = Some("Cardiology".into());
    cardiology.child_sub_service_line = Some("Interventional Cardiology".into());
    insert_edge(&pool, &cardiology).await;

    let mut oncology = cardiology.clone();
    oncology.parent_service_line = Some("Oncology".into());
    oncology.child_service_line = Some("Oncology".into());
    oncology.child_sub_service_line = Some("Radiation Oncology".into());
    insert_edge(&pool, &oncology).await;

    let svc = ContributionService::new(Arc::new(SqliteMart::new(pool)), Duration::from_secs(5));

    let scoped = svc
        .contributions_for_parent("losIndex__medicareId__vizientServiceLine", "AFP658", Some("Cardiology"), None)
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(
        scoped[0].child_entity.as_ref().and_then(|e| e.get("vizientSubServiceLine")),
        Some("Interventional Cardiology")
    );

    let facility_wide = svc
        .contributions_for_parent("losIndex__medicareId__vizientServiceLine", "AFP658", Some("Facility-wide"), None)
        .await
        .unwrap();
    assert_eq!(facility_wide.len(), 1);
    assert_eq!(facility_wide[0].parent_entity.get("vizientServiceLine"), None);
}
