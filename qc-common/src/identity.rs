//! Entity identity model
//!
//! A signal is identified by `(canonical_node_id, metric_id, facility_id,
//! entity_dimensions_hash, detected_at)`. The dimension hash is an MD5 digest
//! over the canonical JSON text of the dimension map (keys sorted, `", "` and
//! `": "` separators), which is the form the analytics pipeline hashes, so a
//! hash computed here equals one read from the mart.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// Digest of the empty string: the hash of an absent or empty dimension map
pub const EMPTY_DIMENSIONS_HASH: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Entity dimension map (dimension name -> value), excluding the facility
///
/// Backed by a `BTreeMap` so iteration order is the canonical (sorted-key) order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityDimensions(BTreeMap<String, String>);

impl EntityDimensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Build from a decoded JSON object
    ///
    /// Scalar values are kept as their text form; `null` values are dropped.
    /// Arrays, nested objects and non-object roots are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            Error::InvalidInput(format!("entity dimensions must be a JSON object, got {}", value))
        })?;

        let mut dims = Self::new();
        for (key, value) in object {
            match value {
                serde_json::Value::Null => {}
                serde_json::Value::String(s) => dims.insert(key.clone(), s.clone()),
                serde_json::Value::Number(n) => dims.insert(key.clone(), n.to_string()),
                serde_json::Value::Bool(b) => dims.insert(key.clone(), b.to_string()),
                other => {
                    return Err(Error::InvalidInput(format!(
                        "entity dimension '{}' has non-scalar value {}",
                        key, other
                    )))
                }
            }
        }
        Ok(dims)
    }

    /// Parse the JSON text form stored in the mart
    pub fn parse(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        Self::from_json(&value)
    }

    /// Canonical text the hash is computed over
    pub fn canonical_text(&self) -> String {
        let mut out = String::from("{");
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&json_string(key));
            out.push_str(": ");
            out.push_str(&json_string(value));
        }
        out.push('}');
        out
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EntityDimensions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn json_string(s: &str) -> String {
    // Serializing a &str cannot fail
    serde_json::Value::String(s.to_string()).to_string()
}

/// Content hash of entity dimensions
///
/// Never null: absent and empty maps both hash the empty string, which is
/// [`EMPTY_DIMENSIONS_HASH`], so the uniqueness constraint can include the column.
pub fn entity_dimensions_hash(dims: Option<&EntityDimensions>) -> String {
    let text = match dims {
        Some(d) if !d.is_empty() => d.canonical_text(),
        _ => String::new(),
    };
    format!("{:x}", Md5::digest(text.as_bytes()))
}

/// Hash recorded by the pipeline when present, otherwise computed here
pub fn effective_dimensions_hash(recorded: Option<&str>, dims: Option<&EntityDimensions>) -> String {
    match recorded.map(str::trim).filter(|h| !h.is_empty()) {
        Some(hash) => hash.to_string(),
        None => entity_dimensions_hash(dims),
    }
}

/// Identity tuple of a signal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalIdentity {
    pub canonical_node_id: String,
    pub metric_id: String,
    pub facility_id: Option<String>,
    pub entity_dimensions_hash: String,
    pub detected_at: DateTime<Utc>,
}

impl fmt::Display for SignalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}#{}",
            self.canonical_node_id,
            self.metric_id,
            self.facility_id.as_deref().unwrap_or("-"),
            &self.entity_dimensions_hash
        )
    }
}
