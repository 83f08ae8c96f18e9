//! Core engine: types, documents, loading, resolution, environment,
//! execution and reporting.

pub mod config;
pub mod env;
pub mod eventlog;
pub mod executor;
pub mod parser;
pub mod recipe;
pub mod report;
pub mod resolver;
pub mod types;

/// Version checked against a recipe's `MinimumVersion`.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
