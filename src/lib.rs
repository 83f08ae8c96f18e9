//! AutoPkg: recipe-driven automation runner.
//!
//! Recipes chain processors into pipelines. Child recipes and overrides
//! layer on a parent, and resolution flattens the chain into one model
//! before any step runs. Steps share one environment of `%key%`
//! substitutable variables.

pub mod cli;
pub mod core;
pub mod processors;
