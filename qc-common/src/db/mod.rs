//! Application database: schema and canonical signal model

pub mod init;
pub mod models;

pub use init::*;
pub use models::*;
