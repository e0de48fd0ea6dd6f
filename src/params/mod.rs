//! Parameter substitution
//!
//! Computes identifiers and display text from runtime parameters.

mod metadata;
mod template;

pub use metadata::TestMetadata;
pub use template::{render, resolve, resolve_opt, stringify, Parameters, SubstitutionError};
