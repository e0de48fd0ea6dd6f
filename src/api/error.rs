//! Remote API errors

use thiserror::Error;

/// Errors returned by remote API calls
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Remote service returned {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid client configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// Status code of the response, if the service answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// "Bad request" and "not found" answers will not change on retry
    pub fn is_terminal(&self) -> bool {
        matches!(self.status(), Some(400) | Some(404))
    }
}

/// Result type for remote API calls
pub type ApiResult<T> = Result<T, ApiError>;
