//! Coordination errors
//!
//! These never leave the sync module; they are logged and turned into a
//! fallback to normal reporting.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Coordination service not reachable at {0}")]
    Unavailable(String),

    #[error("Failed to start coordination service: {0}")]
    Launch(String),

    #[error("Coordination service not healthy after {0} seconds")]
    StartupTimeout(u64),

    #[error("Coordination request failed: {0}")]
    Request(String),

    #[error("Coordination service returned {0}")]
    Status(u16),
}

pub type SyncResult<T> = Result<T, SyncError>;
