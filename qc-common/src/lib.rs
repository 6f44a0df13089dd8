//! # Quality Compass Common Library
//!
//! Shared code for the Quality Compass signal services including:
//! - Entity identity model (dimension hashing, identity tuple)
//! - Hierarchy classification and sentinel normalization
//! - Canonical signal read model and application schema
//! - Configuration loading
//! - Timestamp utilities

pub mod config;
pub mod db;
pub mod decimal;
pub mod error;
pub mod hierarchy;
pub mod identity;
pub mod time;

pub use error::{Error, Result};
pub use hierarchy::HierarchyLevel;
pub use identity::{EntityDimensions, SignalIdentity};
