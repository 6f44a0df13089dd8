//! API view of attribution edges: percentages, labels and descriptions

use qc_common::hierarchy::HierarchyLevel;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use super::contribution_service::{ContributionRecord, Entity, HierarchicalContributions};

const ROOT_LABEL: &str = "Root";
const UNKNOWN_LABEL: &str = "Unknown";

/// One edge as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributionResponse {
    pub method: String,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub child_value: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub parent_value: Option<Decimal>,
    pub weight_field: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub weight_value: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub weight_share_percent: Decimal,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub contribution_value: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub excess_over_parent_percent: Option<Decimal>,
    pub parent_node_id: String,
    pub parent_entity: Entity,
    pub child_entity: Option<Entity>,
    pub child_entity_label: String,
    pub description: String,
}

/// Both directions of one signal as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchicalContributionsResponse {
    pub upward_contribution: Option<ContributionResponse>,
    pub downward_contributions: Vec<ContributionResponse>,
    pub signal_hierarchy_level: HierarchyLevel,
    pub has_children: bool,
    pub has_parent: bool,
}

impl From<&HierarchicalContributions> for HierarchicalContributionsResponse {
    fn from(h: &HierarchicalContributions) -> Self {
        Self {
            upward_contribution: h.upward.as_ref().map(to_response),
            downward_contributions: h.downward.iter().map(to_response).collect(),
            signal_hierarchy_level: h.level,
            has_children: !h.downward.is_empty(),
            has_parent: h.upward.is_some(),
        }
    }
}

/// Round to one decimal place, keeping the trailing zero (`35` -> `35.0`)
fn one_decimal(value: f64) -> Option<Decimal> {
    let mut rounded = Decimal::from_f64(value)?.round_dp(1);
    rounded.rescale(1);
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    Some(rounded)
}

/// `excess / parent × 100`; absent when either input is absent or the parent is zero
pub fn excess_over_parent_percent(record: &ContributionRecord) -> Option<Decimal> {
    let excess = record.excess_over_parent?;
    let parent = record.parent_value.filter(|p| *p != 0.0)?;
    one_decimal(excess / parent * 100.0)
}

pub fn weight_share_percent(record: &ContributionRecord) -> Decimal {
    one_decimal(record.weight_share * 100.0).unwrap_or_else(|| Decimal::new(0, 1))
}

/// Display label of the child entity
pub fn child_entity_label(record: &ContributionRecord) -> String {
    let Some(child) = record.child_entity.as_ref().filter(|c| !c.is_empty()) else {
        return ROOT_LABEL.to_string();
    };

    child
        .get("vizientSubServiceLine")
        .or_else(|| child.get("vizientServiceLine"))
        .or_else(|| {
            child
                .iter()
                .find(|(key, _)| !record.parent_entity.contains_key(key))
                .map(|(_, value)| value)
        })
        .or_else(|| child.iter().next().map(|(_, value)| value))
        .unwrap_or(UNKNOWN_LABEL)
        .to_string()
}

/// One-sentence summary of how the child moves the parent
pub fn describe(label: &str, weight_share_percent: Decimal, excess_percent: Option<Decimal>) -> String {
    match excess_percent {
        None => format!("{label} accounts for {weight_share_percent}% of total volume."),
        Some(x) if x > Decimal::ZERO => format!(
            "{label} contributes {x}% above parent average, accounting for {weight_share_percent}% of total volume."
        ),
        Some(x) if x < Decimal::ZERO => format!(
            "{label} performs {}% below parent average, representing {weight_share_percent}% of total volume.",
            x.abs()
        ),
        Some(_) => format!("{label} matches parent average, representing {weight_share_percent}% of total volume."),
    }
}

pub fn to_response(record: &ContributionRecord) -> ContributionResponse {
    let weight_share_percent = weight_share_percent(record);
    let excess_over_parent_percent = excess_over_parent_percent(record);
    let child_entity_label = child_entity_label(record);
    let description = describe(&child_entity_label, weight_share_percent, excess_over_parent_percent);

    ContributionResponse {
        method: record.method.clone(),
        child_value: record.child_value.and_then(Decimal::from_f64),
        parent_value: record.parent_value.and_then(Decimal::from_f64),
        weight_field: record.weight_field.clone(),
        weight_value: Decimal::from_f64(record.weight_value).unwrap_or_default(),
        weight_share_percent,
        contribution_value: record.contribution_value.and_then(Decimal::from_f64),
        excess_over_parent_percent,
        parent_node_id: record.parent_node_id.clone(),
        parent_entity: record.parent_entity.clone(),
        child_entity: record.child_entity.clone(),
        child_entity_label,
        description,
    }
}
