//! HTTP API handlers for qc-signals

pub mod contributions;
pub mod health;
pub mod signals;

pub use contributions::contribution_routes;
pub use health::health_routes;
pub use signals::signal_routes;
