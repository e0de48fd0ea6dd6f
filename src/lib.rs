//! Test management adapter core
//!
//! Builds step and fixture trees from test framework events, resolves
//! parametrized metadata, and delivers finished results to a test
//! management service, optionally coordinating with other workers.

pub mod api;
pub mod builder;
pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
pub mod listener;
pub mod models;
pub mod params;
pub mod sync;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{AdapterError, AdapterResult};
