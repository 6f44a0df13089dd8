//! Facility -> service line -> sub-service line hierarchy
//!
//! The analytics pipeline encodes "no value" three different ways: the
//! `"Facility-wide"` service line, the string `"None"` as a sub-service line,
//! and the empty string. These helpers collapse all of them to `None` so the
//! rest of the code only ever sees present-or-absent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Service-line sentinel meaning "no service line"
pub const FACILITY_WIDE: &str = "Facility-wide";

/// Sub-service-line literal kept for compatibility with older pipeline output
const NONE_LITERAL: &str = "None";

/// Service line with the facility-wide sentinel and empty string mapped to `None`
pub fn normalize_service_line(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty() && *v != FACILITY_WIDE)
}

/// Sub-service line with `"None"` and empty string mapped to `None`
pub fn normalize_sub_service_line(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty() && *v != NONE_LITERAL)
}

/// Position of a signal in the facility hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyLevel {
    Facility,
    ServiceLine,
    SubServiceLine,
}

impl HierarchyLevel {
    /// Classify from a signal's hierarchy fields (sentinels tolerated)
    pub fn classify(service_line: Option<&str>, sub_service_line: Option<&str>) -> Self {
        if normalize_sub_service_line(sub_service_line).is_some() {
            HierarchyLevel::SubServiceLine
        } else if normalize_service_line(service_line).is_some() {
            HierarchyLevel::ServiceLine
        } else {
            HierarchyLevel::Facility
        }
    }

    /// Facility-wide signals have no parent aggregate
    pub fn has_parent(&self) -> bool {
        !matches!(self, HierarchyLevel::Facility)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HierarchyLevel::Facility => "facility",
            HierarchyLevel::ServiceLine => "service_line",
            HierarchyLevel::SubServiceLine => "sub_service_line",
        }
    }
}

impl fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
