//! Tally Kernel Library
//!
//! Dynamic query/filter engine, relation-aware persistence, and the
//! time-tracking domain schema. The `tally` binary is a small operator CLI
//! over the same pieces.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod listing;
pub mod models;
pub mod query;
pub mod repository;
pub mod schema;
pub mod state;

pub use error::{QueryError, QueryResult};
