//! Adapter errors

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::params::SubstitutionError;

/// Errors that stop event processing
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Substitution(#[from] SubstitutionError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Invalid event on line {line}: {source}")]
    Event {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read events: {0}")]
    Io(#[from] std::io::Error),
}

pub type AdapterResult<T> = Result<T, AdapterError>;
