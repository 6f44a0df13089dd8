//! Application database queries

pub mod signals;

pub use signals::*;
